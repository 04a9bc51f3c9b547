use super::PeerAddress;
use crate::errconf;
use crate::error::{Error, Result};

/// A node's identity: its zero-based rank in the sorted group. Identities
/// index into the group, so slot assignments and the published address book
/// are identical on every node.
pub type Identity = usize;

/// Orders the bootstrap group and derives this node's identity.
///
/// The group is the union of the local address and the configured peers,
/// sorted under the PeerAddress total order. Every member derives the same
/// sequence from its own configuration (validated later during parameter
/// exchange), so a member's position in it is a stable group-wide identity.
///
/// Two members sharing an address would make identity assignment ambiguous,
/// so duplicates are a fatal configuration error rather than a tie to break.
pub fn rank(own: &PeerAddress, peers: &[PeerAddress]) -> Result<(Vec<PeerAddress>, Identity)> {
    let mut group = Vec::with_capacity(peers.len() + 1);
    group.push(own.clone());
    group.extend_from_slice(peers);
    group.sort();
    if let Some(pair) = group.windows(2).find(|pair| pair[0] == pair[1]) {
        return errconf!("duplicate group member address {}", pair[0]);
    }
    let id = group
        .iter()
        .position(|addr| addr == own)
        .ok_or_else(|| Error::Config(format!("own address {own} not in group")))?;
    Ok((group, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str, port: u16) -> PeerAddress {
        PeerAddress::new(host, port)
    }

    /// All rotations of the same member list produce the same group order,
    /// and the identities 0..N-1 are each assigned exactly once.
    #[test]
    fn permutation_invariance() {
        let members =
            [addr("10.0.0.2", 8000), addr("10.0.0.1", 9000), addr("10.0.0.3", 7000), addr("10.0.0.1", 8000)];

        let mut groups = Vec::new();
        let mut ids = Vec::new();
        let mut rotated = members.to_vec();
        for _ in 0..members.len() {
            rotated.rotate_left(1);
            let (own, peers) = rotated.split_first().unwrap();
            let (group, id) = rank(own, peers).unwrap();
            assert_eq!(group[id], *own);
            groups.push(group);
            ids.push(id);
        }

        assert!(groups.windows(2).all(|pair| pair[0] == pair[1]));
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    /// Same-host groups order by port: 8000/8001/8002 get identities 0/1/2.
    #[test]
    fn port_order() {
        let a = addr("127.0.0.1", 8000);
        let b = addr("127.0.0.1", 8001);
        let c = addr("127.0.0.1", 8002);

        let (group, id) = rank(&a, &[b.clone(), c.clone()]).unwrap();
        assert_eq!(group, vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(id, 0);

        let (_, id) = rank(&b, &[c.clone(), a.clone()]).unwrap();
        assert_eq!(id, 1);
        let (_, id) = rank(&c, &[a, b]).unwrap();
        assert_eq!(id, 2);
    }

    /// Hosts order lexicographically, before ports are considered.
    #[test]
    fn host_order_is_lexicographic() {
        let (group, _) = rank(
            &addr("10.0.0.10", 9000),
            &[addr("10.0.0.2", 1000), addr("10.0.0.1", 9999)],
        )
        .unwrap();
        assert_eq!(
            group,
            vec![addr("10.0.0.1", 9999), addr("10.0.0.10", 9000), addr("10.0.0.2", 1000)]
        );
    }

    #[test]
    fn duplicate_address_is_fatal() {
        let own = addr("127.0.0.1", 8000);
        let result = rank(&own, &[addr("127.0.0.1", 8001), addr("127.0.0.1", 8001)]);
        assert!(matches!(result, Err(Error::Config(_))), "{result:?}");

        // A peer configured with our own address is equally fatal.
        let result = rank(&own, &[own.clone()]);
        assert!(matches!(result, Err(Error::Config(_))), "{result:?}");
    }
}
