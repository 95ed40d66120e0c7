pub mod application;
pub mod command;
pub mod config;
pub mod database;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod host;
pub mod paths;
pub mod sigil;
pub mod ssh;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, ErrorCode, Result};
