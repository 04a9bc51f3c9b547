//! Coordinates the cold start of a fixed group of peer nodes. Before any
//! worker runs, every node must agree on a numeric identity per node, a full
//! mesh of pairwise control connections, and the endpoints each node's local
//! worker replicas will listen on. The phases are strictly ordered: identity
//! assignment, replica port allocation, mesh establishment, parameter
//! exchange, worker launch, address book publication, mesh teardown, and a
//! final wait for the local replicas to come up.
//!
//! One agent is single-threaded and sequential throughout; safety across the
//! group comes from every member observing the same group order and playing
//! the accept/connect role that order assigns (see [`mesh`]), not from
//! locking.

pub mod addrbook;
pub mod exchange;
pub mod launch;
pub mod mesh;
pub mod ranking;

pub use addrbook::AddressBook;
pub use exchange::Parameters;
pub use ranking::Identity;

use std::collections::BTreeMap;
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::errconf;
use crate::error::{Error, Result};
use crate::ports;

/// The address of one peer's bootstrap agent, or of a replica worker
/// endpoint: a host and TCP port. Ordered lexicographically by host, then by
/// port; identities derive from this order, so it must be identical on every
/// member and duplicate-free. Encoded as a ["host", port] pair on the wire
/// and in published files.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl encoding::Value for PeerAddress {}

impl From<(String, u16)> for PeerAddress {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerAddress> for (String, u16) {
    fn from(addr: PeerAddress) -> Self {
        (addr.host, addr.port)
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((host, port)) = s.rsplit_once(':') else {
            return errconf!("invalid address {s}, expected host:port");
        };
        let port = port.parse().map_err(|_| Error::Config(format!("invalid port in {s}")))?;
        Ok(Self::new(host, port))
    }
}

/// Settings for a bootstrap round. [`Config::new`] fills the timing and
/// data-store knobs with defaults; the binary overrides them from its
/// configuration file.
#[derive(Clone, Debug)]
pub struct Config {
    /// This agent's own address, exactly as it appears in every peer's
    /// configuration.
    pub addr: PeerAddress,
    /// The other members' agent addresses, in no particular order.
    pub peers: Vec<PeerAddress>,
    /// Replica slots per member. Must be identical across the group,
    /// validated during parameter exchange.
    pub parallelism: usize,
    /// Worker launch command: program and leading arguments. The replica
    /// port, parameter file path and data-store coordinates are appended.
    pub worker_command: Vec<String>,
    /// Data-store connection string template; {id} expands to identity + 1.
    pub store_addr: String,
    /// Data-store identifier template; {id} expands to identity + 1.
    pub store_name: String,
    /// Directory the address book is published into.
    pub output_dir: PathBuf,
    /// Wait budget for inbound connections from lower-ranked peers.
    pub accept_timeout: Duration,
    /// Connect attempts per higher-ranked peer.
    pub connect_retries: u32,
    /// Delay between connect attempts.
    pub connect_backoff: Duration,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// Read and write timeout on established peer connections.
    pub read_timeout: Duration,
    /// Delay between liveness checks of replica ports.
    pub liveness_interval: Duration,
    /// Liveness checks before reporting a launch timeout.
    pub liveness_retries: u32,
}

impl Config {
    pub fn new(addr: PeerAddress, peers: Vec<PeerAddress>, parallelism: usize) -> Self {
        Self {
            addr,
            peers,
            parallelism,
            worker_command: Vec::new(),
            store_addr: "jdbc:mysql://localhost/?user=escrow{id}&password=e{id}&useSSL=false"
                .into(),
            store_name: "escrow{id}".into(),
            output_dir: PathBuf::from("."),
            accept_timeout: Duration::from_secs(60),
            connect_retries: 30,
            connect_backoff: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            liveness_interval: Duration::from_secs(1),
            liveness_retries: 60,
        }
    }
}

/// Live state of one bootstrap round, created when identities are assigned
/// and filled in phase by phase. Passing it explicitly keeps each phase's
/// inputs and outputs visible in its signature.
#[derive(Debug)]
pub struct BootstrapContext {
    /// All member agent addresses, own included, in identity order.
    pub group: Vec<PeerAddress>,
    /// This node's position in the group.
    pub id: Identity,
    /// Endpoints the local replicas will listen on, one per slot.
    pub replica_addrs: Vec<PeerAddress>,
    /// Control connections to every other member, keyed by declared address.
    /// Mutated only during mesh establishment, read-only afterwards.
    pub mesh: BTreeMap<PeerAddress, TcpStream>,
    /// Peers' replica endpoints, keyed by their agent address. Complete once
    /// parameter exchange finishes.
    pub peer_replicas: BTreeMap<PeerAddress, Vec<PeerAddress>>,
}

impl BootstrapContext {
    pub fn new(group: Vec<PeerAddress>, id: Identity) -> Self {
        Self {
            group,
            id,
            replica_addrs: Vec::new(),
            mesh: BTreeMap::new(),
            peer_replicas: BTreeMap::new(),
        }
    }

    /// This node's own agent address.
    pub fn own(&self) -> &PeerAddress {
        &self.group[self.id]
    }

    /// The other members' agent addresses, in identity order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerAddress> {
        let id = self.id;
        self.group.iter().enumerate().filter(move |(i, _)| *i != id).map(|(_, addr)| addr)
    }

    /// The given slot's worker endpoint on every member, in identity order.
    /// Must only be called once peer parameters are complete.
    pub fn slot_endpoints(&self, slot: usize) -> Vec<PeerAddress> {
        self.group
            .iter()
            .enumerate()
            .map(|(i, member)| {
                if i == self.id {
                    self.replica_addrs[slot].clone()
                } else {
                    self.peer_replicas[member][slot].clone()
                }
            })
            .collect()
    }

    /// Best-effort shutdown of all peer connections. Runs on success and on
    /// every error path, so peers blocked reading from us see EOF instead of
    /// hanging until their own timeouts.
    pub fn close_mesh(&mut self) {
        for (peer, socket) in std::mem::take(&mut self.mesh) {
            if let Err(err) = socket.shutdown(Shutdown::Both) {
                debug!("Closing connection to {peer}: {err}");
            }
        }
    }
}

/// A bootstrap agent for one node: runs the rendezvous sequence, launches the
/// local worker replicas, publishes the address book, and waits for the
/// replicas to come up.
pub struct Bootstrap {
    config: Config,
}

impl Bootstrap {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs a full bootstrap round, returning the published address book.
    /// Every failure is terminal for the round; established peer connections
    /// are closed before returning either way.
    pub fn run(&self) -> Result<AddressBook> {
        let (group, id) = ranking::rank(&self.config.addr, &self.config.peers)?;
        let mut ctx = BootstrapContext::new(group, id);
        info!("Assigned identity {id} in group of {}", ctx.group.len());

        let result = self.run_phases(&mut ctx);
        ctx.close_mesh();
        let book = result?;

        info!("Peer connections closed. Waiting for local replicas to listen");
        let replica_ports: Vec<u16> = ctx.replica_addrs.iter().map(|addr| addr.port).collect();
        ports::wait_listening(
            &replica_ports,
            self.config.liveness_interval,
            self.config.liveness_retries,
        )?;
        info!("All {} local replicas are listening", replica_ports.len());
        Ok(book)
    }

    /// The phases that run while the mesh is open.
    fn run_phases(&self, ctx: &mut BootstrapContext) -> Result<AddressBook> {
        ctx.replica_addrs = ports::allocate_replicas(
            &self.config.addr.host,
            ctx.id,
            ctx.group.len(),
            self.config.parallelism,
        )?;
        mesh::establish(ctx, &self.config)?;
        info!("Mesh established with {} peers. Exchanging parameters", ctx.mesh.len());
        exchange::exchange(ctx)?;
        info!("Parameters exchanged and validated. Launching workers");
        launch::start_replicas(ctx, &self.config)?;
        info!("Workers launched. Publishing address book");
        let (book, _) = addrbook::publish(ctx, &self.config.output_dir)?;
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::encoding::Value as _;

    #[test]
    fn address_order() {
        // Hosts order lexicographically before ports are considered.
        assert!(PeerAddress::new("10.0.0.1", 9000) < PeerAddress::new("10.0.0.2", 80));
        assert!(PeerAddress::new("10.0.0.10", 80) < PeerAddress::new("10.0.0.2", 80));
        assert!(PeerAddress::new("a", 80) < PeerAddress::new("a", 81));
    }

    #[test]
    fn address_parse() {
        let addr: PeerAddress = "127.0.0.1:8000".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("127.0.0.1", 8000));
        assert_eq!(addr.to_string(), "127.0.0.1:8000");

        assert!("127.0.0.1".parse::<PeerAddress>().is_err());
        assert!("127.0.0.1:notaport".parse::<PeerAddress>().is_err());
        assert!("127.0.0.1:99999".parse::<PeerAddress>().is_err());
    }

    /// Addresses encode as ["host", port] pairs, the form peers and clients
    /// expect on the wire and in published files.
    #[test]
    fn address_encoding() {
        let addr = PeerAddress::new("127.0.0.1", 8000);
        assert_eq!(addr.encode().unwrap(), br#"["127.0.0.1",8000]"#);
        assert_eq!(PeerAddress::decode(br#"["127.0.0.1",8000]"#).unwrap(), addr);
    }

    #[test]
    fn context_accessors() {
        let group = vec![
            PeerAddress::new("10.0.0.1", 8000),
            PeerAddress::new("10.0.0.2", 8000),
            PeerAddress::new("10.0.0.3", 8000),
        ];
        let ctx = BootstrapContext::new(group.clone(), 1);
        assert_eq!(ctx.own(), &group[1]);
        assert_eq!(ctx.peers().collect::<Vec<_>>(), vec![&group[0], &group[2]]);
    }
}
