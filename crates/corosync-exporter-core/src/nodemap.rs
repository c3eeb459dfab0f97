//! Node identity resolution.
//!
//! The statistics namespace addresses knet peers by `node<nodeid>`, while the
//! nodelist is indexed by an internal slot that has nothing to do with the
//! configured node id:
//!
//! ```text
//! nodelist.node.22.name (str) = hostname-goes-here
//! nodelist.node.22.nodeid (u32) = 26
//! nodelist.node.22.ring0_addr (str) = 42.0.69.69
//! ```
//!
//! [`NodeMap::resolve`] joins the `name` and `nodeid` records of each slot into
//! a `node26 → hostname-goes-here` map. It runs once at startup; the result is
//! never mutated afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::debug;

use crate::stats::StatLine;

/// Key prefix of the nodelist listing.
pub const NODELIST_PREFIX: &str = "nodelist.node";

/// Error joining the name and id tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMapError {
    /// A slot carries a `name` but no `nodeid`.
    MissingNodeId { slot: String, name: String },
}

impl fmt::Display for NodeMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMapError::MissingNodeId { slot, name } => write!(
                f,
                "nodelist slot {} ({}) has no nodeid; refusing to build an incomplete node map",
                slot, name
            ),
        }
    }
}

impl std::error::Error for NodeMapError {}

/// Immutable `node<id>` → node name map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMap {
    names: HashMap<String, String>,
}

impl NodeMap {
    /// Builds the map from nodelist records.
    ///
    /// Lines outside `nodelist.node.<slot>.<field>` and fields other than
    /// `name` / `nodeid` are ignored. Slots with an id but no name are ignored
    /// too; a name without an id is fatal.
    pub fn resolve(lines: &[StatLine]) -> Result<Self, NodeMapError> {
        let mut name_table: BTreeMap<&str, &str> = BTreeMap::new();
        let mut id_table: BTreeMap<&str, String> = BTreeMap::new();

        for line in lines {
            let Some(rest) = line
                .key
                .strip_prefix(NODELIST_PREFIX)
                .and_then(|r| r.strip_prefix('.'))
            else {
                continue;
            };
            let Some((slot, field)) = rest.split_once('.') else {
                continue;
            };
            match field {
                "name" => {
                    name_table.insert(slot, line.value.as_str());
                }
                "nodeid" => {
                    id_table.insert(slot, format!("node{}", line.value));
                }
                _ => {}
            }
        }

        let mut names = HashMap::with_capacity(name_table.len());
        for (slot, name) in name_table {
            let Some(id) = id_table.get(slot) else {
                return Err(NodeMapError::MissingNodeId {
                    slot: slot.to_string(),
                    name: name.to_string(),
                });
            };
            debug!(slot, node = %id, name, "resolved node identity");
            names.insert(id.clone(), name.to_string());
        }

        Ok(Self { names })
    }

    /// Looks up a node name by its `node<id>` token.
    pub fn get(&self, token: &str) -> Option<&str> {
        self.names.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(String, String)> for NodeMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
