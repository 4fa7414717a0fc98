//! Completion correlation.
//!
//! Resolves a finished task to the entity it produced or touched. Paths are
//! tried in order:
//!
//! 1. the target id, when the caller already knows it (updates, deletes);
//! 2. a named completion detail, e.g. `protectionPolicyExtId`;
//! 3. the first affected entity whose relation kind matches;
//! 4. a collection diff against a [`CollectionSnapshot`] taken before
//!    submission, matching new members on a [`SecondaryKey`].
//!
//! Path 4 is racy: another actor adding a matching member between the
//! snapshot and the re-read makes the result ambiguous. It never guesses;
//! anything but exactly one candidate is
//! [`OrchestrationError::CorrelationAmbiguous`].

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::error::OrchestrationError;
use crate::remote::ControlPlane;
use crate::types::entity::{EntityKind, EntityRecord, EntityRef};
use crate::types::task::{CompletionRecord, CompletionValue};

/// Attributes identifying a sub-resource among its siblings, as
/// `(JSON pointer, expected value)` pairs.
///
/// # Examples
///
/// ```
/// use prism_tasks::correlator::SecondaryKey;
/// use prism_tasks::EntityRecord;
/// use serde_json::json;
///
/// let key = SecondaryKey::new()
///     .with("/diskAddress/busType", json!("SCSI"))
///     .with("/diskAddress/index", json!(1));
///
/// let disk = json!({ "diskAddress": { "busType": "SCSI", "index": 1 } });
/// let record = EntityRecord::new("disk-1", disk.as_object().unwrap().clone());
/// assert!(key.matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecondaryKey {
    fields: Vec<(String, Value)>,
}

impl SecondaryKey {
    /// An empty key, matching every member.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `(pointer, value)` pair.
    pub fn with(mut self, pointer: impl Into<String>, value: Value) -> Self {
        self.fields.push((pointer.into(), value));
        self
    }

    /// Returns `true` if every pair matches `record`.
    pub fn matches(&self, record: &EntityRecord) -> bool {
        self.fields
            .iter()
            .all(|(pointer, expected)| record.field(pointer) == Some(expected))
    }
}

/// Membership of a collection before a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    parent: EntityRef,
    member_kind: EntityKind,
    key: SecondaryKey,
    known: HashSet<String>,
}

impl CollectionSnapshot {
    /// Lists the `member_kind` children of `parent` and remembers their ids.
    ///
    /// # Errors
    ///
    /// [`OrchestrationError::ReadFailed`] if the listing fails, or a decode
    /// error for a malformed response.
    pub async fn capture(
        api: &dyn ControlPlane,
        parent: EntityRef,
        member_kind: EntityKind,
        key: SecondaryKey,
    ) -> Result<Self, OrchestrationError> {
        let members = list_members(api, &parent, &member_kind).await?;
        Ok(Self {
            parent,
            member_kind,
            key,
            known: members.into_iter().map(|m| m.ext_id).collect(),
        })
    }

    /// Ids present when the snapshot was taken.
    pub fn known_ids(&self) -> &HashSet<String> {
        &self.known
    }
}

async fn list_members(
    api: &dyn ControlPlane,
    parent: &EntityRef,
    member_kind: &EntityKind,
) -> Result<Vec<EntityRecord>, OrchestrationError> {
    let response = api
        .list_children(parent, member_kind)
        .await
        .map_err(|source| OrchestrationError::ReadFailed {
            target: parent.clone(),
            source,
        })?;
    Ok(response.into_entity_list()?)
}

/// What the correlator needs to know about the operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    expected_kind: EntityKind,
    detail_name: Option<String>,
    target: Option<String>,
    exclude: HashSet<String>,
    fallback: Option<CollectionSnapshot>,
}

impl OperationContext {
    /// Context for an operation producing an entity of `expected_kind`.
    pub fn new(expected_kind: impl Into<EntityKind>) -> Self {
        Self {
            expected_kind: expected_kind.into(),
            detail_name: None,
            target: None,
            exclude: HashSet::new(),
            fallback: None,
        }
    }

    /// The completion detail that names the produced entity.
    pub fn with_completion_detail(mut self, name: impl Into<String>) -> Self {
        self.detail_name = Some(name.into());
        self
    }

    /// The entity id is already known.
    pub fn with_target(mut self, ext_id: impl Into<String>) -> Self {
        self.target = Some(ext_id.into());
        self
    }

    /// Never resolve to `ext_id`, e.g. the source entity of a clone.
    pub fn excluding(mut self, ext_id: impl Into<String>) -> Self {
        self.exclude.insert(ext_id.into());
        self
    }

    /// Enables the collection-diff fallback.
    pub fn with_fallback(mut self, snapshot: CollectionSnapshot) -> Self {
        self.fallback = Some(snapshot);
        self
    }

    /// Kind of the produced entity.
    pub fn expected_kind(&self) -> &EntityKind {
        &self.expected_kind
    }

    fn admits(&self, ext_id: &str) -> bool {
        !ext_id.is_empty() && !self.exclude.contains(ext_id)
    }
}

/// How an id was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationPath {
    /// The caller supplied it.
    KnownTarget,
    /// Read from a named completion detail.
    CompletionDetail,
    /// Read from the affected-entity list.
    AffectedEntity,
    /// Recovered by diffing the parent collection. Best effort.
    CollectionDiff,
}

impl fmt::Display for CorrelationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KnownTarget => write!(f, "known_target"),
            Self::CompletionDetail => write!(f, "completion_detail"),
            Self::AffectedEntity => write!(f, "affected_entity"),
            Self::CollectionDiff => write!(f, "collection_diff"),
        }
    }
}

/// A resolved entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// External id of the entity.
    pub ext_id: String,
    /// Path that produced it.
    pub path: CorrelationPath,
}

/// Resolves finished tasks to entity ids.
pub struct CompletionCorrelator<'a> {
    api: &'a dyn ControlPlane,
}

impl<'a> CompletionCorrelator<'a> {
    /// Creates a correlator; `api` is used only by the fallback path.
    pub fn new(api: &'a dyn ControlPlane) -> Self {
        Self { api }
    }

    /// Resolves the single entity `record` produced.
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::CorrelationAmbiguous`] if the fallback finds
    ///   zero or several candidates.
    /// - [`OrchestrationError::CompletionDataMissing`] if no path applies.
    /// - [`OrchestrationError::UnknownVariant`] for an undecodable detail.
    /// - [`OrchestrationError::ReadFailed`] if the fallback re-read fails.
    pub async fn correlate(
        &self,
        record: &CompletionRecord,
        context: &OperationContext,
    ) -> Result<Correlation, OrchestrationError> {
        if let Some(target) = &context.target {
            return Ok(Correlation {
                ext_id: target.clone(),
                path: CorrelationPath::KnownTarget,
            });
        }

        if let Some(ext_id) = detail_ids(record, context)?
            .into_iter()
            .find(|id| context.admits(id))
        {
            return Ok(Correlation {
                ext_id,
                path: CorrelationPath::CompletionDetail,
            });
        }

        if let Some(ext_id) = affected_ids(record, context).into_iter().next() {
            return Ok(Correlation {
                ext_id,
                path: CorrelationPath::AffectedEntity,
            });
        }

        if let Some(snapshot) = &context.fallback {
            return self.diff(record, context, snapshot).await;
        }

        Err(OrchestrationError::CompletionDataMissing {
            handle: record.handle().clone(),
            expected: context.expected_kind.clone(),
        })
    }

    /// Resolves every entity `record` produced, e.g. the VMs restored from a
    /// recovery point. Does not use the fallback path.
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::CompletionDataMissing`] if nothing matches.
    /// - [`OrchestrationError::UnknownVariant`] for an undecodable detail.
    pub fn correlate_all(
        &self,
        record: &CompletionRecord,
        context: &OperationContext,
    ) -> Result<Vec<String>, OrchestrationError> {
        let mut ids: Vec<String> = detail_ids(record, context)?
            .into_iter()
            .filter(|id| context.admits(id))
            .collect();
        if ids.is_empty() {
            ids = affected_ids(record, context);
        }
        if ids.is_empty() {
            return Err(OrchestrationError::CompletionDataMissing {
                handle: record.handle().clone(),
                expected: context.expected_kind.clone(),
            });
        }
        Ok(ids)
    }

    async fn diff(
        &self,
        record: &CompletionRecord,
        context: &OperationContext,
        snapshot: &CollectionSnapshot,
    ) -> Result<Correlation, OrchestrationError> {
        tracing::warn!(
            task_id = %record.handle(),
            parent = %snapshot.parent,
            kind = %snapshot.member_kind,
            "completion data has no id, falling back to collection diff"
        );
        let members = list_members(self.api, &snapshot.parent, &snapshot.member_kind).await?;
        let mut candidates: Vec<String> = members
            .into_iter()
            .filter(|m| !snapshot.known.contains(&m.ext_id) && snapshot.key.matches(m))
            .map(|m| m.ext_id)
            .filter(|id| context.admits(id))
            .collect();

        if candidates.len() == 1 {
            if let Some(ext_id) = candidates.pop() {
                return Ok(Correlation {
                    ext_id,
                    path: CorrelationPath::CollectionDiff,
                });
            }
        }
        tracing::warn!(
            task_id = %record.handle(),
            candidates = candidates.len(),
            "collection diff did not yield exactly one candidate"
        );
        Err(OrchestrationError::CorrelationAmbiguous {
            handle: record.handle().clone(),
            kind: snapshot.member_kind.clone(),
            candidates,
        })
    }
}

fn detail_ids(
    record: &CompletionRecord,
    context: &OperationContext,
) -> Result<Vec<String>, OrchestrationError> {
    let Some(name) = &context.detail_name else {
        return Ok(Vec::new());
    };
    let Some(detail) = record.completion_detail(name) else {
        return Ok(Vec::new());
    };
    let ids = match detail.decoded_value()? {
        CompletionValue::String(value) => split_ids(&value),
        CompletionValue::StringList(values) => values
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
        CompletionValue::Integer(value) => vec![value.to_string()],
        CompletionValue::Boolean(_) => Vec::new(),
    };
    Ok(ids)
}

fn affected_ids(record: &CompletionRecord, context: &OperationContext) -> Vec<String> {
    record
        .entities_affected()
        .iter()
        .filter(|e| e.rel == context.expected_kind && context.admits(&e.ext_id))
        .map(|e| e.ext_id.clone())
        .collect()
}

fn split_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::remote::memory::InMemoryControlPlane;
    use crate::types::task::{
        CompletionDetail, EntityReference, TaskSnapshot, TaskStatus,
    };
    use pretty_assertions::assert_eq;

    const VM: &str = "vmm:ahv:config:vm";

    fn succeeded(snapshot: TaskSnapshot) -> CompletionRecord {
        CompletionRecord::from_snapshot(snapshot, TaskStatus::Succeeded, None)
    }

    #[test]
    fn split_ids_ignores_blanks() {
        assert_eq!(split_ids(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_ids("").is_empty());
    }

    #[tokio::test]
    async fn known_target_wins() {
        let plane = InMemoryControlPlane::new();
        let record = succeeded(
            TaskSnapshot::new("t", TaskStatus::Succeeded)
                .with_affected_entity(EntityReference::new(VM, "other")),
        );
        let context = OperationContext::new(VM).with_target("vm-1");
        let found = CompletionCorrelator::new(&plane)
            .correlate(&record, &context)
            .await
            .unwrap();
        assert_eq!(found.ext_id, "vm-1");
        assert_eq!(found.path, CorrelationPath::KnownTarget);
    }

    #[tokio::test]
    async fn affected_entities_are_selected_by_relation() {
        let plane = InMemoryControlPlane::new();
        let record = succeeded(
            TaskSnapshot::new("t", TaskStatus::Succeeded)
                .with_affected_entity(EntityReference::new("vmm:content:template", "tpl-1"))
                .with_affected_entity(EntityReference::new(VM, "vm-src"))
                .with_affected_entity(EntityReference::new(VM, "vm-new")),
        );
        let context = OperationContext::new(VM).excluding("vm-src");
        let found = CompletionCorrelator::new(&plane)
            .correlate(&record, &context)
            .await
            .unwrap();
        assert_eq!(found.ext_id, "vm-new");
        assert_eq!(found.path, CorrelationPath::AffectedEntity);
    }

    #[tokio::test]
    async fn nothing_to_go_on_is_missing_data() {
        let plane = InMemoryControlPlane::new();
        let record = succeeded(TaskSnapshot::new("t", TaskStatus::Succeeded));
        let err = CompletionCorrelator::new(&plane)
            .correlate(&record, &OperationContext::new(VM).with_completion_detail("vmExtId"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompletionDataMissing);
    }

    #[test]
    fn correlate_all_splits_comma_separated_details() {
        let plane = InMemoryControlPlane::new();
        let record = succeeded(
            TaskSnapshot::new("t", TaskStatus::Succeeded)
                .with_completion_detail(CompletionDetail::text("vmExtIds", "vm-1,vm-2, vm-3")),
        );
        let context = OperationContext::new(VM).with_completion_detail("vmExtIds");
        let ids = CompletionCorrelator::new(&plane)
            .correlate_all(&record, &context)
            .unwrap();
        assert_eq!(ids, vec!["vm-1", "vm-2", "vm-3"]);
    }
}
