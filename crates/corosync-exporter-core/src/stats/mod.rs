//! Parsing of the `corosync-cmapctl` text output.
//!
//! Every record has the shape `<dotted-key> (<type-tag>) = <value>`, one per
//! line. See [`line`] for the grammar and the typed value model.

pub mod line;

pub use line::{LineError, SampleValue, StatLine, ValueType, parse_line, parse_output};
