use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs as _};
use std::time::{Duration, Instant};

use log::debug;

use super::{BootstrapContext, Config, PeerAddress};
use crate::encoding::Value as _;
use crate::errmesh;
use crate::error::{Error, Result};

/// How often the accept loop polls for a new inbound connection.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Establishes the control mesh: one TCP connection to every other group
/// member, keyed by the peer's declared address.
///
/// Roles follow identity order: a node first accepts one inbound connection
/// from each lower-ranked peer, then connects to each higher-ranked peer in
/// ascending group order. Rank 0 accepts nothing and starts dialing at once,
/// so the lowest-ranked unfinished node can always make progress and no set
/// of nodes can end up all waiting to accept from each other.
///
/// Any failure is fatal for the whole round; the caller is responsible for
/// closing whatever connections were established before the failure.
pub fn establish(ctx: &mut BootstrapContext, config: &Config) -> Result<()> {
    let port = ctx.own().port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .map_err(|err| Error::Mesh(format!("binding 0.0.0.0:{port}: {err}")))?;
    accept_inbound(ctx, &listener, config)?;
    // The listening socket is only needed while lower-ranked peers dial in.
    drop(listener);
    connect_outbound(ctx, config)
}

/// Accepts one connection from each of the `id` lower-ranked peers.
///
/// The OS-reported remote address can't be matched against the configured
/// group (NAT and port remapping make it unreliable), so each peer declares
/// its own configured address in its first frame, and connections are keyed
/// by that declaration after checking it against the group.
fn accept_inbound(ctx: &mut BootstrapContext, listener: &TcpListener, config: &Config) -> Result<()> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + config.accept_timeout;
    while ctx.mesh.len() < ctx.id {
        let (mut socket, remote) = match listener.accept() {
            Ok(conn) => conn,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return errmesh!(
                        "timed out waiting for {} lower-ranked peers",
                        ctx.id - ctx.mesh.len()
                    );
                }
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(err) => return errmesh!("accept on port {} failed: {err}", ctx.own().port),
        };
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        socket.set_write_timeout(Some(config.read_timeout))?;

        let peer = PeerAddress::read_from(&mut socket)
            .map_err(|err| Error::Mesh(format!("reading identification from {remote}: {err}")))?;
        if peer == *ctx.own() {
            return errmesh!("inbound connection from {remote} claims our own address {peer}");
        }
        if !ctx.group.contains(&peer) {
            return errmesh!("inbound peer {peer} is not a group member");
        }
        if ctx.mesh.contains_key(&peer) {
            return errmesh!("duplicate connection from {peer}");
        }
        debug!("Accepted connection from {peer} (socket address {remote})");
        ctx.mesh.insert(peer, socket);
    }
    Ok(())
}

/// Connects to every higher-ranked peer, in ascending group order, and sends
/// the identification frame on each new connection.
fn connect_outbound(ctx: &mut BootstrapContext, config: &Config) -> Result<()> {
    let higher = ctx.group[ctx.id + 1..].to_vec();
    for peer in higher {
        let mut socket = connect_with_retry(&peer, config)?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        socket.set_write_timeout(Some(config.read_timeout))?;
        ctx.own()
            .write_into(&mut socket)
            .map_err(|err| Error::Mesh(format!("identifying to {peer}: {err}")))?;
        debug!("Connected to {peer}");
        ctx.mesh.insert(peer, socket);
    }
    Ok(())
}

/// Dials a higher-ranked peer. The peer may not have reached its listen state
/// yet (it can still be accepting its own lower-ranked connections), so
/// failed attempts are retried with a fixed backoff up to the configured
/// budget.
fn connect_with_retry(peer: &PeerAddress, config: &Config) -> Result<TcpStream> {
    let addr = resolve(peer)?;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(socket) => return Ok(socket),
            Err(err) if attempts < config.connect_retries => {
                debug!("Connecting to {peer} failed ({err}), retrying");
                std::thread::sleep(config.connect_backoff);
            }
            Err(err) => {
                return errmesh!("connecting to {peer} failed after {attempts} attempts: {err}")
            }
        }
    }
}

fn resolve(peer: &PeerAddress) -> Result<SocketAddr> {
    (peer.host.as_str(), peer.port)
        .to_socket_addrs()
        .map_err(|err| Error::Mesh(format!("resolving {peer}: {err}")))?
        .next()
        .ok_or_else(|| Error::Mesh(format!("address {peer} does not resolve")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Value as _;

    /// Returns a context and config for a three-node group on localhost,
    /// from the perspective of the node with the given identity.
    fn context(base_port: u16, id: usize) -> (BootstrapContext, Config) {
        let group: Vec<_> =
            (0..3).map(|i| PeerAddress::new("127.0.0.1", base_port + i)).collect();
        let config = Config::new(group[id].clone(), Vec::new(), 1);
        (BootstrapContext::new(group, id), config)
    }

    /// An inbound peer declaring an address outside the group is fatal.
    #[test]
    fn rejects_unknown_inbound_peer() {
        let (mut ctx, mut config) = context(26310, 1);
        config.accept_timeout = Duration::from_secs(5);

        let target = ctx.own().clone();
        let intruder = std::thread::spawn(move || {
            let addr = resolve(&target).unwrap();
            let mut socket = loop {
                match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                    Ok(socket) => break socket,
                    Err(_) => std::thread::sleep(Duration::from_millis(20)),
                }
            };
            PeerAddress::new("10.9.9.9", 1).write_into(&mut socket).unwrap();
            socket
        });

        let result = establish(&mut ctx, &config);
        assert!(matches!(result, Err(Error::Mesh(_))), "{result:?}");
        intruder.join().unwrap();
    }

    /// An inbound peer declaring the acceptor's own address is fatal.
    #[test]
    fn rejects_inbound_self_claim() {
        let (mut ctx, mut config) = context(26320, 1);
        config.accept_timeout = Duration::from_secs(5);

        let target = ctx.own().clone();
        let intruder = std::thread::spawn(move || {
            let addr = resolve(&target).unwrap();
            let mut socket = loop {
                match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                    Ok(socket) => break socket,
                    Err(_) => std::thread::sleep(Duration::from_millis(20)),
                }
            };
            target.write_into(&mut socket).unwrap();
            socket
        });

        let result = establish(&mut ctx, &config);
        assert!(matches!(result, Err(Error::Mesh(_))), "{result:?}");
        intruder.join().unwrap();
    }

    /// The accept phase gives up once its deadline passes.
    #[test]
    fn accept_times_out_without_peers() {
        let (mut ctx, mut config) = context(26330, 2);
        config.accept_timeout = Duration::from_millis(200);

        let result = establish(&mut ctx, &config);
        assert!(matches!(result, Err(Error::Mesh(_))), "{result:?}");
        assert!(ctx.mesh.is_empty());
    }

    /// The connect phase gives up once its retry budget is exhausted. Rank 0
    /// never accepts, so this also exercises the no-accept fast path.
    #[test]
    fn connect_exhausts_retries() {
        let (mut ctx, mut config) = context(26340, 0);
        config.connect_retries = 2;
        config.connect_backoff = Duration::from_millis(10);
        config.connect_timeout = Duration::from_millis(100);

        let result = establish(&mut ctx, &config);
        assert!(matches!(result, Err(Error::Mesh(_))), "{result:?}");
    }
}
