//! pursuit-core - Sync core for Pursuit
//!
//! Local-first storage for tracker records, with a durable queue that mirrors
//! local writes to a shared remote backend and last-writer-wins
//! reconciliation of pulled rows.

pub mod admin;
pub mod auth;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod events;
pub mod identity;
pub mod models;
pub mod queue;
pub mod remote;
pub mod store;
pub mod tracker;
pub mod util;

#[cfg(test)]
mod tests;

pub use error::{Error, RemoteError, RemoteErrorKind, Result};
pub use models::{EntityType, Record, RecordId};
pub use tracker::{RefreshReport, Tracker};
