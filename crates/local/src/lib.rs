//! The local backend (C4): on-disk blob files plus a SQLite-indexed row
//! table, giving the rest of the workspace its authoritative store and the
//! ordinal ids the migration engine iterates over.

pub mod backend;
pub mod blob;
pub mod db;

pub use backend::LocalBackend;
pub use db::{ContentRow, Index, MigrationRow, PendingMigrationRow, PendingUploadRow};
