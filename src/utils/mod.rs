//! Generic utility primitives with zero domain knowledge.
//!
//! - `shell` - Shell escaping, quoting and remote path joining

pub mod shell;
