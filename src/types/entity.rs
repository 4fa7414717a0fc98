//! Entity identity types shared by every component.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Relation kind of an entity, e.g. `vmm:ahv:config:vm`.
///
/// The control plane reports affected entities by relation kind, so this is
/// also the key the correlator matches on.
///
/// # Examples
///
/// ```
/// use prism_tasks::EntityKind;
/// use prism_tasks::constants::REL_SUBNET;
///
/// let kind = EntityKind::from(REL_SUBNET);
/// assert_eq!(kind.as_str(), "networking:config:subnet");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates a kind from its relation string.
    pub fn new(rel: impl Into<String>) -> Self {
        Self(rel.into())
    }

    /// Returns the relation string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKind {
    fn from(rel: &str) -> Self {
        Self::new(rel)
    }
}

impl From<String> for EntityKind {
    fn from(rel: String) -> Self {
        Self(rel)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A concrete entity: its kind plus its external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Relation kind of the entity.
    pub kind: EntityKind,
    /// External identifier assigned by the control plane.
    pub ext_id: String,
}

impl EntityRef {
    /// Creates a reference to the entity `ext_id` of the given kind.
    pub fn new(kind: impl Into<EntityKind>, ext_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ext_id: ext_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.ext_id)
    }
}

/// An entity as returned by a read: its identifier plus its attributes,
/// left untyped because per-resource field mapping lives outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// External identifier.
    pub ext_id: String,
    /// Remaining attributes, verbatim.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Creates a record from its identifier and attribute map.
    pub fn new(ext_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            ext_id: ext_id.into(),
            fields,
        }
    }

    /// Looks up an attribute by JSON pointer relative to the record, e.g.
    /// `/diskAddress/busType`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prism_tasks::EntityRecord;
    /// use serde_json::json;
    ///
    /// let fields = json!({ "diskAddress": { "busType": "SCSI", "index": 1 } });
    /// let record = EntityRecord::new("disk-1", fields.as_object().unwrap().clone());
    ///
    /// assert_eq!(record.field("/diskAddress/index"), Some(&json!(1)));
    /// assert_eq!(record.field("/diskAddress/missing"), None);
    /// ```
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        let path = pointer.strip_prefix('/').unwrap_or(pointer);
        match path.split_once('/') {
            Some((head, rest)) => self.fields.get(head)?.pointer(&format!("/{rest}")),
            None => self.fields.get(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_ref_display() {
        let target = EntityRef::new("vmm:ahv:config:vm", "vm-1");
        assert_eq!(target.to_string(), "vmm:ahv:config:vm/vm-1");
    }

    #[test]
    fn entity_record_flattens_fields() {
        let record: EntityRecord = serde_json::from_value(json!({
            "extId": "abc",
            "name": "p1",
        }))
        .unwrap();
        assert_eq!(record.ext_id, "abc");
        assert_eq!(record.field("/name"), Some(&json!("p1")));
        assert_eq!(record.field("name"), Some(&json!("p1")));
    }
}
