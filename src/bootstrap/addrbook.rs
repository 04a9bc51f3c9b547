use std::path::{Path, PathBuf};

use log::info;

use super::{BootstrapContext, PeerAddress};
use crate::encoding::Value as _;
use crate::error::Result;

/// The client-facing address book: entry [r][m] is the endpoint of the worker
/// serving replica slot r on group member m. Clients contact slot r of the
/// group by connecting to every address in row r.
pub type AddressBook = Vec<Vec<PeerAddress>>;

/// Assembles the address book from this node's own replica endpoints and the
/// ones its peers reported. Requires complete peer parameters.
pub fn build(ctx: &BootstrapContext) -> AddressBook {
    (0..ctx.replica_addrs.len()).map(|slot| ctx.slot_endpoints(slot)).collect()
}

/// Builds the address book and writes it to the output directory, keyed by
/// this node's identity so every group member publishes its own file.
pub fn publish(ctx: &BootstrapContext, dir: &Path) -> Result<(AddressBook, PathBuf)> {
    let book = build(ctx);
    let path = dir.join(format!("server-addrs-{}.json", ctx.id));
    std::fs::write(&path, book.encode()?)?;
    info!("Published address book to {}", path.display());
    Ok((book, path))
}

/// Reads a published address book back. Used by clients locating the group.
pub fn read(path: &Path) -> Result<AddressBook> {
    AddressBook::decode(&std::fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn addr(host: &str, port: u16) -> PeerAddress {
        PeerAddress::new(host, port)
    }

    /// A three-member group with two slots, from the last node's perspective.
    fn context() -> BootstrapContext {
        let group =
            vec![addr("10.0.0.1", 8000), addr("10.0.0.2", 8000), addr("10.0.0.3", 8000)];
        let mut ctx = BootstrapContext::new(group.clone(), 2);
        ctx.replica_addrs = vec![addr("10.0.0.3", 7000), addr("10.0.0.3", 7001)];
        ctx.peer_replicas = BTreeMap::from([
            (group[0].clone(), vec![addr("10.0.0.1", 5000), addr("10.0.0.1", 5001)]),
            (group[1].clone(), vec![addr("10.0.0.2", 6000), addr("10.0.0.2", 6001)]),
        ]);
        ctx
    }

    /// P rows of N entries, with this node's own endpoints at its own group
    /// position.
    #[test]
    fn matrix_shape() {
        let ctx = context();
        let book = build(&ctx);
        assert_eq!(book.len(), 2);
        for (slot, row) in book.iter().enumerate() {
            assert_eq!(row.len(), 3);
            assert_eq!(row[ctx.id], ctx.replica_addrs[slot]);
        }
        assert_eq!(
            book,
            vec![
                vec![addr("10.0.0.1", 5000), addr("10.0.0.2", 6000), addr("10.0.0.3", 7000)],
                vec![addr("10.0.0.1", 5001), addr("10.0.0.2", 6001), addr("10.0.0.3", 7001)],
            ]
        );
    }

    #[test]
    fn publish_roundtrip() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let (book, path) = publish(&ctx, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "server-addrs-2.json");
        assert_eq!(read(&path).unwrap(), book);
    }
}
