//! Enrolled identities and the adapter from stored user records.
//!
//! Stored records carry descriptors in several historical shapes (a single
//! vector, a list of vectors, a singleton-wrapped list, or any of those
//! JSON-encoded as a string). They are normalized here, once, so the matcher
//! only ever sees a list of vectors per identity.

use crate::config::GroupFilter;
use crate::filter::GroupLookup;
use crate::types::{DetectedFace, Identity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A face already matched at or above this similarity is not enrolled again.
pub const ENROLL_SIMILARITY_CEILING: u8 = 98;

#[derive(Error, Debug, PartialEq)]
pub enum RosterError {
    #[error("identity name cannot be empty")]
    EmptyName,
    #[error("embedding cannot be empty")]
    EmptyEmbedding,
    #[error("face already matches {name} at {similarity}%")]
    AlreadyKnown { name: String, similarity: u8 },
}

/// Identity ID as stored: numeric in older records, text in newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// Raw user record as returned by the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub descriptor: Value,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Normalize a stored descriptor into a list of embeddings.
///
/// Malformed members are skipped; unrecognized shapes yield an empty list.
pub fn normalize_descriptor(raw: &Value) -> Vec<Vec<f32>> {
    match raw {
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::String(_)) => Vec::new(),
            Ok(decoded) => normalize_descriptor(&decoded),
            Err(e) => {
                tracing::warn!(error = %e, "descriptor string is not valid JSON");
                Vec::new()
            }
        },
        Value::Array(items) if items.is_empty() => Vec::new(),
        Value::Array(items) if items.iter().all(Value::is_number) => {
            numeric_vector(items).into_iter().collect()
        }
        Value::Array(items) => {
            // [[[..], [..]]] wraps the real list once.
            if let [Value::Array(inner)] = items.as_slice() {
                if inner.first().is_some_and(Value::is_array) {
                    return normalize_descriptor(&items[0]);
                }
            }
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    let vector = match item {
                        Value::Array(values) => numeric_vector(values),
                        _ => None,
                    };
                    if vector.is_none() {
                        tracing::warn!(index, "skipping malformed embedding");
                    }
                    vector
                })
                .collect()
        }
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(kind = value_kind(other), "unsupported descriptor shape");
            Vec::new()
        }
    }
}

fn numeric_vector(values: &[Value]) -> Option<Vec<f32>> {
    values
        .iter()
        .map(|v| v.as_f64().map(|n| n as f32))
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Canonical form of an identity name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// A new identity was created.
    Created { id: String },
    /// An alternate embedding was added to an existing identity.
    Extended { id: String, embeddings: usize },
}

/// Reject enrolling a face that the roster already recognizes confidently.
pub fn check_enrollable(face: &DetectedFace) -> Result<(), RosterError> {
    match face.name() {
        Some(name) if face.matched.similarity >= ENROLL_SIMILARITY_CEILING => {
            Err(RosterError::AlreadyKnown {
                name: name.to_string(),
                similarity: face.matched.similarity,
            })
        }
        _ => Ok(()),
    }
}

/// The set of enrolled identities, unique by upper-case name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    identities: Vec<Identity>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from stored records.
    ///
    /// Names are trimmed and upper-cased; nameless records are dropped and
    /// records sharing a name are merged into the first one.
    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        let mut roster = Self::new();
        for record in records {
            let name = normalize_name(&record.name);
            if name.is_empty() {
                tracing::warn!(id = %record.id, "dropping identity record without a name");
                continue;
            }

            let embeddings = normalize_descriptor(&record.descriptor);
            let groups = record.groups.unwrap_or_default();

            if let Some(existing) = roster.find_mut(&name) {
                tracing::warn!(name = %name, id = %record.id, "merging duplicate identity record");
                existing.embeddings.extend(embeddings);
                merge_groups(&mut existing.groups, groups);
                continue;
            }

            roster.identities.push(Identity {
                id: record.id.to_string(),
                name,
                embeddings,
                groups,
                thumbnail: record.thumbnail,
            });
        }

        tracing::info!(
            identities = roster.identities.len(),
            embeddings = roster.identities.iter().map(|i| i.embeddings.len()).sum::<usize>(),
            "roster loaded"
        );
        roster
    }

    /// Serialize back to the stored record shape, one list of vectors per identity.
    pub fn to_records(&self) -> Vec<IdentityRecord> {
        self.identities
            .iter()
            .map(|identity| IdentityRecord {
                id: RecordId::Text(identity.id.clone()),
                name: identity.name.clone(),
                descriptor: Value::from(
                    identity
                        .embeddings
                        .iter()
                        .map(|e| Value::from(e.iter().map(|&v| f64::from(v)).collect::<Vec<_>>()))
                        .collect::<Vec<_>>(),
                ),
                groups: Some(identity.groups.clone()),
                thumbnail: identity.thumbnail.clone(),
            })
            .collect()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Identity> {
        let name = normalize_name(name);
        self.identities.iter().find(|i| i.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Identity> {
        self.identities.iter_mut().find(|i| i.name == name)
    }

    /// Sorted distinct group names across all identities.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .identities
            .iter()
            .flat_map(|i| i.groups.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Identities passing the group filter, used to narrow matching.
    pub fn restrict_to_group(&self, filter: &GroupFilter) -> Roster {
        Roster {
            identities: self
                .identities
                .iter()
                .filter(|i| filter.admits(&i.groups))
                .cloned()
                .collect(),
        }
    }

    /// Enroll an embedding under a name.
    ///
    /// An existing identity gains an alternate embedding and any new groups;
    /// otherwise a new identity is created.
    pub fn enroll(
        &mut self,
        name: &str,
        embedding: Vec<f32>,
        groups: Vec<String>,
    ) -> Result<EnrollOutcome, RosterError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if embedding.is_empty() {
            return Err(RosterError::EmptyEmbedding);
        }

        if let Some(existing) = self.find_mut(&name) {
            existing.embeddings.push(embedding);
            merge_groups(&mut existing.groups, groups);
            tracing::info!(name = %name, embeddings = existing.embeddings.len(), "added embedding");
            return Ok(EnrollOutcome::Extended {
                id: existing.id.clone(),
                embeddings: existing.embeddings.len(),
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(name = %name, id = %id, "enrolled new identity");
        self.identities.push(Identity {
            id: id.clone(),
            name,
            embeddings: vec![embedding],
            groups,
            thumbnail: None,
        });
        Ok(EnrollOutcome::Created { id })
    }
}

fn merge_groups(into: &mut Vec<String>, groups: Vec<String>) {
    for group in groups {
        if !into.iter().any(|g| g.eq_ignore_ascii_case(&group)) {
            into.push(group);
        }
    }
}

impl GroupLookup for Roster {
    fn groups_for(&self, name: &str) -> Option<&[String]> {
        self.identities.as_slice().groups_for(name)
    }
}
