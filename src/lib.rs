#![warn(clippy::all)]

pub mod bootstrap;
pub mod encoding;
pub mod error;
pub mod ports;

pub use bootstrap::{AddressBook, Bootstrap, BootstrapContext, Config, PeerAddress};
pub use error::{Error, Result};
