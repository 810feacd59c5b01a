//! Daemon subsystem: exclusive-instance lock, liveness snapshots, signal
//! handling, and the main scanning loop.

pub mod health;
pub mod lock;
#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
