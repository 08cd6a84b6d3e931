//! chronicle-core library.
//!
//! An append-only journal stored as a plain-text log, plus encrypted
//! merge-sync of that log through a single remote snapshot.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at module seams, each mapping to an
//!   [`error::ErrorCode`]; `anyhow::Result` only for configuration loading.
//! - **Logging**: `tracing` macros with structured fields. Entry bodies and
//!   key material are never logged.

pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod lock;
pub mod remote;
pub mod store;
pub mod sync;

pub use entry::{Entry, EntryId};
pub use error::ErrorCode;
pub use store::{LogStore, StoreError};
pub use sync::{SyncEngine, SyncError};
