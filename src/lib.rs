//! dropbin: an ephemeral file share.
//!
//! Uploads get a short identifier and are purged after a fixed TTL. The
//! [`services::registry::Registry`] owns identifier and filename uniqueness
//! and the persisted metadata table; [`services::sweeper::EvictionSweeper`]
//! evicts expired and orphaned uploads in the background; the HTTP layer in
//! [`handlers`] and [`routes`] is a thin JSON wrapper around both.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
