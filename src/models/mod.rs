//! Core data models for the ephemeral file share.
//!
//! Records map cleanly to the persisted metadata table and serialize
//! naturally as JSON via `serde`.

pub mod object;
