//! Readers for the Linux `/proc` filesystem.

pub mod memory;
pub mod parser;

pub use memory::{MemoryProbe, RSS_KEY};
