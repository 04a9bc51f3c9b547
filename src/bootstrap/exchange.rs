use serde::{Deserialize, Serialize};

use super::{BootstrapContext, Identity, PeerAddress};
use crate::encoding::{self, Value as _};
use crate::error::{Error, Result};
use crate::errval;

/// The parameter record broadcast to every peer once the mesh is up: this
/// node's identity, its view of the sorted group, and the endpoints its local
/// replicas will listen on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    pub id: Identity,
    pub addrs: Vec<PeerAddress>,
    pub replica_addrs: Vec<PeerAddress>,
}

impl encoding::Value for Parameters {}

/// Exchanges parameters with every peer over the established mesh and
/// validates that all members agree on the group and the replica count.
///
/// The same record is sent to every peer before any is received: each member
/// does likewise, so nobody blocks sending while a peer blocks receiving (the
/// records are far smaller than socket buffers). Receives then proceed in
/// group order. The exchange is a barrier: it succeeds only once every peer
/// has produced a validated record, which makes `ctx.peer_replicas` complete.
pub fn exchange(ctx: &mut BootstrapContext) -> Result<()> {
    let own = Parameters {
        id: ctx.id,
        addrs: ctx.group.clone(),
        replica_addrs: ctx.replica_addrs.clone(),
    };

    for (peer, socket) in ctx.mesh.iter_mut() {
        own.write_into(socket)
            .map_err(|err| Error::Mesh(format!("sending parameters to {peer}: {err}")))?;
    }

    for (peer, socket) in ctx.mesh.iter_mut() {
        let theirs = Parameters::read_from(socket)
            .map_err(|err| Error::Mesh(format!("receiving parameters from {peer}: {err}")))?;
        validate(&own, &theirs, peer)?;
        ctx.peer_replicas.insert(peer.clone(), theirs.replica_addrs);
    }
    Ok(())
}

/// Checks a peer's parameter record against our own view. Any disagreement is
/// fatal, and the error carries both views to make the divergence debuggable.
fn validate(own: &Parameters, theirs: &Parameters, peer: &PeerAddress) -> Result<()> {
    if theirs.addrs.len() != own.addrs.len() {
        return errval!(
            "membership size mismatch with {peer}: ours {}, theirs {}",
            own.addrs.len(),
            theirs.addrs.len()
        );
    }
    // A difference in either host or port at any position means the groups
    // diverged.
    for (ours, theirs_addr) in own.addrs.iter().zip(theirs.addrs.iter()) {
        if ours != theirs_addr {
            return errval!(
                "group mismatch with {peer}: ours {:?}, theirs {:?}",
                own.addrs,
                theirs.addrs
            );
        }
    }
    if theirs.replica_addrs.len() != own.replica_addrs.len() {
        return errval!(
            "replica count mismatch with {peer}: ours {}, theirs {}",
            own.replica_addrs.len(),
            theirs.replica_addrs.len()
        );
    }
    Ok(())
}
