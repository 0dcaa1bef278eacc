//! Lightning adapter of the payment connector
//!
//! - `client`: the lnd-style node RPC contract
//! - `connector`: the `LightningConnector` adapter
//! - `watcher`: settled invoice polling
//! - `mock`: in-memory node for tests

pub mod client;
pub mod connector;
pub mod mock;
pub mod watcher;

pub use client::{AddedInvoice, LndClient, LndError, PayReq, SendResponse, SettledInvoice};
pub use connector::LndConnector;
pub use watcher::InvoiceWatcher;
