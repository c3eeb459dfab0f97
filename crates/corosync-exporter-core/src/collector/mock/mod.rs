//! Test doubles for the collector seams: an in-memory `/proc` and a scripted
//! statistics source.

mod filesystem;
mod source;

pub use filesystem::MockFs;
pub use source::MockSource;
