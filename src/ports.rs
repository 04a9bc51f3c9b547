//! Replica port selection and liveness, backed by the OS socket table.
//!
//! Both concerns read /proc/net/tcp and /proc/net/tcp6: port allocation
//! rejects ports occupied in any TCP state, while liveness waits for ports to
//! show up in the listening state.

use std::collections::HashSet;
use std::time::Duration;

use log::debug;
use rand::Rng as _;

use crate::bootstrap::{Identity, PeerAddress};
use crate::errconf;
use crate::error::{Error, Result};

/// The range replica ports are drawn from. It is split into one band per
/// group member (plus a spare), and each agent draws only from its own
/// identity's band, so concurrently-bootstrapping agents on one host can't
/// race for the same port.
const PORT_RANGE: std::ops::Range<u32> = 5000..60000;

/// The LISTEN state in /proc/net/tcp.
const TCP_LISTEN: u8 = 0x0a;

/// Random draws to attempt per replica slot before giving up.
const MAX_DRAWS: usize = 1000;

/// Returns all locally-used TCP ports, in any state.
pub fn used_ports() -> Result<HashSet<u16>> {
    socket_table(None)
}

/// Returns all local TCP ports with a listening socket.
pub fn listening_ports() -> Result<HashSet<u16>> {
    socket_table(Some(TCP_LISTEN))
}

fn socket_table(state: Option<u8>) -> Result<HashSet<u16>> {
    let mut ports = HashSet::new();
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(path) {
            Ok(table) => parse_socket_table(&table, state, &mut ports)?,
            // A missing table (e.g. IPv6 disabled) contributes nothing.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(ports)
}

/// Parses /proc/net/tcp-format text: a header line, then whitespace-separated
/// columns where column 1 is the hex local address:port and column 3 the hex
/// socket state.
fn parse_socket_table(table: &str, state: Option<u8>, ports: &mut HashSet<u16>) -> Result<()> {
    for line in table.lines().skip(1) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let (Some(local), Some(st)) = (columns.get(1), columns.get(3)) else { continue };
        let Some((_, port)) = local.rsplit_once(':') else { continue };
        let port = u16::from_str_radix(port, 16)?;
        let st = u8::from_str_radix(st, 16)?;
        if state.map_or(true, |want| want == st) {
            ports.insert(port);
        }
    }
    Ok(())
}

/// Chooses `count` locally-unused ports for this node's replica endpoints,
/// drawing at random from this identity's band of the port range and
/// rejecting ports already in use or already drawn.
pub fn allocate_replicas(
    host: &str,
    id: Identity,
    members: usize,
    count: usize,
) -> Result<Vec<PeerAddress>> {
    let mut used = used_ports()?;
    let width = (PORT_RANGE.end - PORT_RANGE.start) / (members as u32 + 1);
    if width == 0 {
        return errconf!("port range too small for {members} members");
    }
    let band = PORT_RANGE.start + width * id as u32..PORT_RANGE.start + width * (id as u32 + 1);

    let mut rng = rand::thread_rng();
    let mut replicas = Vec::with_capacity(count);
    for _ in 0..count {
        let mut draws = 0;
        let port = loop {
            draws += 1;
            if draws > MAX_DRAWS {
                return errconf!("no free port found in {band:?} for identity {id}");
            }
            let port = rng.gen_range(band.clone()) as u16;
            if used.insert(port) {
                break port;
            }
        };
        replicas.push(PeerAddress::new(host, port));
    }
    Ok(replicas)
}

/// Blocks until every given port has a listening socket, polling the socket
/// table at the given interval up to `retries` times. Exhausting the budget
/// reports which ports never came up.
pub fn wait_listening(ports: &[u16], interval: Duration, retries: u32) -> Result<()> {
    let mut missing: Vec<u16> = ports.to_vec();
    for attempt in 1..=retries {
        let listening = listening_ports()?;
        missing.retain(|port| !listening.contains(port));
        if missing.is_empty() {
            return Ok(());
        }
        debug!("Waiting for ports {missing:?} to listen (check {attempt}/{retries})");
        if attempt < retries {
            std::thread::sleep(interval);
        }
    }
    Err(Error::LivenessTimeout(format!(
        "ports {missing:?} not listening after {retries} checks"
    )))
}
