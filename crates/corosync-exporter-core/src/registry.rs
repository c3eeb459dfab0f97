//! Metric registry.
//!
//! Each canonical metric name owns one entry, created the first time the
//! name is seen. The entry's kind (gauge or info) and its label names are
//! fixed at creation; later upserts that disagree are rejected rather than
//! silently re-typing the metric. Values are last-write-wins per label-value
//! tuple and are never deleted, so series that stop appearing keep their
//! last observed value.
//!
//! Entries are mirrored into a `prometheus::Registry` for the text
//! exposition:
//! - gauges become a `GaugeVec` with the declared labels;
//! - info metrics become `<name>_info` with an extra `pname` label carrying
//!   the string payload and a constant value of 1.

use std::collections::{BTreeMap, btree_map};
use std::fmt;

use prometheus::{Encoder, GaugeVec, Opts, TextEncoder};
use tracing::debug;

use crate::namespace::Labels;
use crate::stats::{SampleValue, ValueType};

/// Content type of [`Registry::render`] output.
pub const TEXT_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Label under which info metrics carry their string payload.
const INFO_PAYLOAD_LABEL: &str = "pname";

/// Metric kind, decided once from the first observed value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Info,
}

impl MetricKind {
    pub fn for_value_type(value_type: ValueType) -> Self {
        if value_type.is_string() {
            MetricKind::Info
        } else {
            MetricKind::Gauge
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Info => write!(f, "info"),
        }
    }
}

/// Stored value for one label-value tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Gauge(SampleValue),
    /// Info payload, exposed under the `pname` label.
    Info(String),
}

/// One row of [`Registry::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub kind: MetricKind,
    pub labels: Labels,
    pub value: Payload,
}

/// Upsert or exposition failure.
#[derive(Debug)]
pub enum RegistryError {
    /// Value type disagrees with the kind fixed at creation.
    KindMismatch {
        name: String,
        expected: MetricKind,
        got: ValueType,
    },
    /// Label names differ from the schema fixed at creation.
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },
    /// Numeric value does not parse under its type tag.
    InvalidValue {
        name: String,
        value_type: ValueType,
        value: String,
    },
    /// Error from the exposition library.
    Exposition(prometheus::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::KindMismatch {
                name,
                expected,
                got,
            } => write!(f, "{} is a {} metric, got {} value", name, expected, got),
            RegistryError::LabelMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "{} has labels [{}], got [{}]",
                name,
                expected.join(","),
                got.join(",")
            ),
            RegistryError::InvalidValue {
                name,
                value_type,
                value,
            } => write!(f, "{}: invalid {} value {:?}", name, value_type, value),
            RegistryError::Exposition(e) => write!(f, "exposition error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Exposition(e) => Some(e),
            _ => None,
        }
    }
}

impl From<prometheus::Error> for RegistryError {
    fn from(e: prometheus::Error) -> Self {
        RegistryError::Exposition(e)
    }
}

struct Entry {
    kind: MetricKind,
    label_names: Vec<String>,
    values: BTreeMap<Vec<String>, Payload>,
    exposed: GaugeVec,
}

/// Canonical name → typed metric entry.
pub struct Registry {
    entries: BTreeMap<String, Entry>,
    exposition: prometheus::Registry,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            exposition: prometheus::Registry::new(),
        }
    }

    /// Number of distinct canonical names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kind fixed for `name`, if the name has been seen.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.entries.get(name).map(|e| e.kind)
    }

    /// Writes `value` for (`name`, `labels`).
    ///
    /// The value is validated before anything is created, so a rejected first
    /// sighting leaves no entry behind.
    pub fn upsert(
        &mut self,
        name: &str,
        labels: &Labels,
        value_type: ValueType,
        value: &str,
    ) -> Result<(), RegistryError> {
        let payload = if value_type.is_string() {
            Payload::Info(value.to_string())
        } else {
            let sample = SampleValue::parse(value_type, value).ok_or_else(|| {
                RegistryError::InvalidValue {
                    name: name.to_string(),
                    value_type,
                    value: value.to_string(),
                }
            })?;
            Payload::Gauge(sample)
        };

        let entry = match self.entries.entry(name.to_string()) {
            btree_map::Entry::Occupied(occupied) => occupied.into_mut(),
            btree_map::Entry::Vacant(vacant) => {
                let kind = MetricKind::for_value_type(value_type);
                vacant.insert(create_entry(&self.exposition, name, labels, kind)?)
            }
        };

        if entry.kind != MetricKind::for_value_type(value_type) {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: entry.kind,
                got: value_type,
            });
        }
        if labels.names() != entry.label_names {
            return Err(RegistryError::LabelMismatch {
                name: name.to_string(),
                expected: entry.label_names.clone(),
                got: labels.names().iter().map(|s| s.to_string()).collect(),
            });
        }

        let tuple: Vec<String> = labels.values().iter().map(|s| s.to_string()).collect();
        let mut exposed_values: Vec<&str> = labels.values();

        match &payload {
            Payload::Gauge(sample) => {
                entry
                    .exposed
                    .with_label_values(&exposed_values)
                    .set(sample.as_f64());
            }
            Payload::Info(pname) => {
                if let Some(Payload::Info(previous)) = entry.values.get(&tuple) {
                    if previous != pname {
                        let mut stale = exposed_values.clone();
                        stale.push(previous.as_str());
                        let _ = entry.exposed.remove_label_values(&stale);
                    }
                }
                exposed_values.push(pname.as_str());
                entry.exposed.with_label_values(&exposed_values).set(1.0);
            }
        }

        entry.values.insert(tuple, payload);
        Ok(())
    }

    /// Current contents, ordered by name and then by label values.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut samples = Vec::new();
        for (name, entry) in &self.entries {
            for (tuple, value) in &entry.values {
                samples.push(Sample {
                    name: name.clone(),
                    kind: entry.kind,
                    labels: entry
                        .label_names
                        .iter()
                        .cloned()
                        .zip(tuple.iter().cloned())
                        .collect(),
                    value: value.clone(),
                });
            }
        }
        samples
    }

    /// Encodes the registry in the text exposition format.
    pub fn render(&self) -> Result<String, RegistryError> {
        let families = self.exposition.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn create_entry(
    exposition: &prometheus::Registry,
    name: &str,
    labels: &Labels,
    kind: MetricKind,
) -> Result<Entry, RegistryError> {
    let label_names: Vec<String> = labels.names().iter().map(|s| s.to_string()).collect();
    let mut exposed_labels: Vec<&str> = labels.names();

    let opts = match kind {
        MetricKind::Gauge => Opts::new(name, format!("corosync statistic {}", name)),
        MetricKind::Info => {
            exposed_labels.push(INFO_PAYLOAD_LABEL);
            Opts::new(
                format!("{}_info", name),
                format!("corosync statistic {} (string value in {})", name, INFO_PAYLOAD_LABEL),
            )
        }
    };
    let exposed = GaugeVec::new(opts, &exposed_labels)?;
    exposition.register(Box::new(exposed.clone()))?;

    debug!(name, %kind, labels = ?label_names, "registered metric");

    Ok(Entry {
        kind,
        label_names,
        values: BTreeMap::new(),
        exposed,
    })
}
