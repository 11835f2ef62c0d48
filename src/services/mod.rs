pub mod clock;
pub mod metadata_store;
pub mod naming;
pub mod registry;
pub mod sweeper;
