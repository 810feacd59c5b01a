//! Persistence plane: the SQLite record sink and its retention maintenance.

#[cfg(feature = "sqlite")]
pub mod maintenance;
#[cfg(feature = "sqlite")]
pub mod sqlite;
