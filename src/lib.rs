// Library module for testable functions

pub mod api;
pub mod config;
pub mod ingestion;
pub mod logging;
pub mod reports;
pub mod telegram;
