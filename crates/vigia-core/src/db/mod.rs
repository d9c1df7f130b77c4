//! Database layer for Vigia

mod connection;
mod draft_store;
mod migrations;

pub use connection::Database;
pub use draft_store::{DraftStore, SqliteDraftStore};
