pub mod commands;
pub mod config;
pub mod farm;
pub mod logging;
pub mod offline;
pub mod query;
