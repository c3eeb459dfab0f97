//! Statistic key classification.
//!
//! Maps graphite-style dotted keys from the `stats.` map onto a canonical
//! metric name plus an ordered label set:
//!
//! | key                                        | metric               | labels            |
//! |--------------------------------------------|----------------------|-------------------|
//! | `stats.knet.handle.tx_crypt_time_ave`      | `knet_handle_<4th>`  |                   |
//! | `stats.knet.node2.link0.latency_ave`       | `knet_<5th>`         | `node`, `link`    |
//! | `stats.srp.rx_data` / `stats.pg.msg_reserved` | `<ns>_<3rd>`      |                   |
//! | `stats.ipcs.global.active`                 | `ipcs_global_<4th>`  |                   |
//! | `stats.ipcs.service0.123.0x1.procname`     | `ipcs_<6th>`         | `service`         |
//! | `stats.corosync.rss`                       | `corosync_rss`       |                   |
//!
//! Every label set starts with `hostname`. The ipcs pid and connection id
//! components are dropped to keep label cardinality bounded.

use std::fmt;

use crate::nodemap::NodeMap;

/// Top-level namespace segment (second dotted component).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    Knet,
    Srp,
    Pg,
    Ipcs,
    Corosync,
    Unknown(String),
}

impl Namespace {
    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "knet" => Namespace::Knet,
            "srp" => Namespace::Srp,
            "pg" => Namespace::Pg,
            "ipcs" => Namespace::Ipcs,
            "corosync" => Namespace::Corosync,
            other => Namespace::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Namespace::Knet => "knet",
            Namespace::Srp => "srp",
            Namespace::Pg => "pg",
            Namespace::Ipcs => "ipcs",
            Namespace::Corosync => "corosync",
            Namespace::Unknown(s) => s,
        }
    }
}

/// Insertion-ordered label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label, replacing the value if the name already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn values(&self) -> Vec<&str> {
        self.0.iter().map(|(_, v)| v.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for (n, v) in iter {
            labels.insert(n, v);
        }
        labels
    }
}

/// Canonical metric name plus labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    pub name: String,
    pub labels: Labels,
}

/// Reason a key could not be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// Key has fewer components than its namespace rule needs.
    TooShort { key: String },
    /// Namespace segment outside the handled set.
    UnknownNamespace(String),
    /// knet key references a node slot missing from the node map.
    UnknownNode { key: String, slot: String },
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::TooShort { key } => write!(f, "key has too few components: {}", key),
            ClassifyError::UnknownNamespace(ns) => write!(f, "unknown namespace: {}", ns),
            ClassifyError::UnknownNode { key, slot } => {
                write!(f, "node {} not in nodelist (key {})", slot, key)
            }
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Classifies statistic keys against a fixed hostname and node map.
#[derive(Debug, Clone)]
pub struct Classifier {
    hostname: String,
    nodes: NodeMap,
}

impl Classifier {
    pub fn new(hostname: impl Into<String>, nodes: NodeMap) -> Self {
        Self {
            hostname: hostname.into(),
            nodes,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    /// Returns the namespace of a key without classifying it.
    pub fn namespace_of(key: &str) -> Namespace {
        Namespace::from_segment(key.split('.').nth(1).unwrap_or(""))
    }

    /// Maps a dotted key to its canonical metric name and labels.
    pub fn classify(&self, key: &str) -> Result<MetricKey, ClassifyError> {
        let parts: Vec<&str> = key.split('.').collect();
        let part = |i: usize| -> Result<&str, ClassifyError> {
            parts
                .get(i)
                .copied()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ClassifyError::TooShort {
                    key: key.to_string(),
                })
        };

        let mut labels = Labels::new();
        labels.insert("hostname", self.hostname.as_str());

        let name = match Namespace::from_segment(part(1)?) {
            Namespace::Knet => {
                if part(2)? == "handle" {
                    format!("knet_handle_{}", part(3)?)
                } else {
                    let slot = part(2)?;
                    let link = part(3)?;
                    let metric = part(4)?;
                    let node = self.lookup_node(slot).ok_or_else(|| ClassifyError::UnknownNode {
                        key: key.to_string(),
                        slot: slot.to_string(),
                    })?;
                    labels.insert("node", node);
                    labels.insert("link", link);
                    format!("knet_{}", metric)
                }
            }
            ns @ (Namespace::Srp | Namespace::Pg) => format!("{}_{}", ns.as_str(), part(2)?),
            Namespace::Ipcs => {
                if part(2)? == "global" {
                    format!("ipcs_global_{}", part(3)?)
                } else {
                    let service = part(2)?;
                    let metric = part(5)?;
                    labels.insert("service", service);
                    format!("ipcs_{}", metric)
                }
            }
            Namespace::Corosync => "corosync_rss".to_string(),
            Namespace::Unknown(ns) => return Err(ClassifyError::UnknownNamespace(ns)),
        };

        Ok(MetricKey {
            name: sanitize_metric_name(&name),
            labels,
        })
    }

    /// Resolves a knet node component: the token itself first, then
    /// `node<component>` for bare numeric slots.
    fn lookup_node(&self, component: &str) -> Option<&str> {
        self.nodes.get(component).or_else(|| {
            if component.starts_with("node") {
                None
            } else {
                self.nodes.get(&format!("node{}", component))
            }
        })
    }
}

/// Replaces characters outside `[a-zA-Z0-9_:]` with `_`.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
