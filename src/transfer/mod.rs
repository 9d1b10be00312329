//! Background transfer subsystem and in-flight bookkeeping

pub mod backend;
pub mod http;
pub mod registry;

pub use backend::{TransferBackend, TransferError, TransferEvent, TransferHandle, TransferId};
pub use http::HttpTransfers;
pub use registry::TransferRegistry;
