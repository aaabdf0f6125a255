use std::error::Error;

pub mod adapter;
pub mod blocks;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod limiter;
pub mod model;
pub mod remote;
pub mod sources;
pub mod state;
pub mod sync;

pub use adapter::{PerItemSourceAdapter, SourceAdapter};
pub use coordinator::ResourceCreationCoordinator;
pub use engine::{Progress, SyncEngine, SyncPhase, no_progress};
pub use error::SyncError;
pub use ledger::SyncedRecordLedger;
pub use limiter::ConcurrencyLimiter;
pub use remote::{RemoteError, RemoteMutationClient};
pub use sync::SyncStats;

/// Flattens an error and its source chain into one line.
pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
