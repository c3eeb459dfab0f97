//! Stat line grammar and typed values.
//!
//! ```text
//! stats.knet.node2.link0.tx_data_packets (u64) = 1432
//! stats.ipcs.service0.3022.0x55d1f0c2a4b0.procname (str) = corosync-cmapctl
//! ```
//!
//! The key is the first whitespace-delimited token, the type tag is wrapped in
//! parentheses, and the value is everything after the `=` sign (trimmed), so
//! string payloads containing spaces survive intact.

use std::fmt;

use tracing::warn;

/// Value type tag emitted by the statistics source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Float,
    Double,
    Str,
}

impl ValueType {
    /// Parses a tag without its surrounding parentheses (`u32`, `str`, ...).
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "u8" => ValueType::U8,
            "u16" => ValueType::U16,
            "u32" => ValueType::U32,
            "u64" => ValueType::U64,
            "i8" => ValueType::I8,
            "i16" => ValueType::I16,
            "i32" => ValueType::I32,
            "i64" => ValueType::I64,
            "flt" => ValueType::Float,
            "dbl" => ValueType::Double,
            "str" => ValueType::Str,
            _ => return None,
        })
    }

    /// Returns the tag as printed by the source.
    pub fn tag(self) -> &'static str {
        match self {
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::Float => "flt",
            ValueType::Double => "dbl",
            ValueType::Str => "str",
        }
    }

    /// `true` for the string kind; every other tag is numeric.
    pub fn is_string(self) -> bool {
        self == ValueType::Str
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.tag())
    }
}

/// Numeric sample, keeping the signedness and width of the source tag.
///
/// 8- and 16-bit tags are range-checked at their own width and then widened
/// into the 32-bit variant of the same signedness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    F64(f64),
}

impl SampleValue {
    /// Parses `raw` according to `value_type`.
    ///
    /// Returns `None` for the string kind and for values that do not fit the
    /// declared width.
    pub fn parse(value_type: ValueType, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Some(match value_type {
            ValueType::U8 => SampleValue::U32(raw.parse::<u8>().ok()?.into()),
            ValueType::U16 => SampleValue::U32(raw.parse::<u16>().ok()?.into()),
            ValueType::U32 => SampleValue::U32(raw.parse().ok()?),
            ValueType::U64 => SampleValue::U64(raw.parse().ok()?),
            ValueType::I8 => SampleValue::I32(raw.parse::<i8>().ok()?.into()),
            ValueType::I16 => SampleValue::I32(raw.parse::<i16>().ok()?.into()),
            ValueType::I32 => SampleValue::I32(raw.parse().ok()?),
            ValueType::I64 => SampleValue::I64(raw.parse().ok()?),
            ValueType::Float => SampleValue::F64(parse_float(raw)?),
            ValueType::Double => SampleValue::F64(raw.parse().ok()?),
            ValueType::Str => return None,
        })
    }

    /// Lossy conversion used by the text exposition.
    pub fn as_f64(self) -> f64 {
        match self {
            SampleValue::U32(v) => v as f64,
            SampleValue::U64(v) => v as f64,
            SampleValue::I32(v) => v as f64,
            SampleValue::I64(v) => v as f64,
            SampleValue::F64(v) => v,
        }
    }
}

/// Parses a `(flt)` value at double precision so the decimal text survives
/// exposition unchanged. Values outside the `f32` range are rejected.
fn parse_float(raw: &str) -> Option<f64> {
    let v: f64 = raw.parse().ok()?;
    if v.is_finite() && v.abs() > f64::from(f32::MAX) {
        return None;
    }
    Some(v)
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::U32(v) => write!(f, "{v}"),
            SampleValue::U64(v) => write!(f, "{v}"),
            SampleValue::I32(v) => write!(f, "{v}"),
            SampleValue::I64(v) => write!(f, "{v}"),
            SampleValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// One raw record from the statistics source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatLine {
    pub key: String,
    pub value_type: ValueType,
    pub value: String,
}

impl StatLine {
    pub fn new(key: impl Into<String>, value_type: ValueType, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_type,
            value: value.into(),
        }
    }
}

/// Error for a line that does not match the record grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// No type tag after the key.
    MissingType(String),
    /// Type tag present but not one the source documents.
    UnknownType { line: String, tag: String },
    /// No `=` separator after the type tag.
    MissingValue(String),
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::MissingType(line) => write!(f, "missing type tag: {:?}", line),
            LineError::UnknownType { line, tag } => {
                write!(f, "unknown type tag ({}): {:?}", tag, line)
            }
            LineError::MissingValue(line) => write!(f, "missing value: {:?}", line),
        }
    }
}

impl std::error::Error for LineError {}

/// Parses a single line of source output.
///
/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<StatLine>, LineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let Some((key, rest)) = trimmed.split_once(char::is_whitespace) else {
        return Err(LineError::MissingType(trimmed.to_string()));
    };

    let Some((tag, rest)) = rest
        .trim_start()
        .strip_prefix('(')
        .and_then(|r| r.split_once(')'))
    else {
        return Err(LineError::MissingType(trimmed.to_string()));
    };

    let value_type = ValueType::from_tag(tag).ok_or_else(|| LineError::UnknownType {
        line: trimmed.to_string(),
        tag: tag.to_string(),
    })?;

    let value = rest
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| LineError::MissingValue(trimmed.to_string()))?;

    Ok(Some(StatLine {
        key: key.to_string(),
        value_type,
        value: value.trim().to_string(),
    }))
}

/// Parses full source output, skipping (and logging) malformed lines.
pub fn parse_output(output: &str) -> Vec<StatLine> {
    output
        .lines()
        .filter_map(|line| match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "skipping malformed stat line");
                None
            }
        })
        .collect()
}
