//! Data ingestion module - functional pipeline for listings from the API and CSV snapshots

pub mod clean;
pub mod columns;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod types;
pub mod write;

pub use types::*;
