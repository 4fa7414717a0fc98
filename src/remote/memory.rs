//! In-process simulated control plane.
//!
//! [`InMemoryControlPlane`] implements [`ControlPlane`] over `DashMap`s. It
//! enforces entity tags the way the real server does and plays back a
//! scripted status sequence for every task it spawns, which makes it the test
//! double for everything above the remote layer.
//!
//! # Entities and Tags
//!
//! Each entity carries a version starting at 1; its tag is `etag-{version}`.
//! Every applied write bumps the version. A write whose `If-Match` differs
//! from the current tag is rejected at submission, before a task exists.
//!
//! # Task Scripts
//!
//! Each submission consumes the next queued [`TaskScript`] (or a default
//! `RUNNING -> SUCCEEDED` script). Status fetch *n* reports the script's
//! status *n*; once the script is exhausted the last status repeats. The
//! write itself is applied when `SUCCEEDED` is first reported.
//!
//! # Examples
//!
//! ```
//! use prism_tasks::remote::memory::{InMemoryControlPlane, TaskScript};
//! use prism_tasks::TaskStatus;
//! use serde_json::json;
//!
//! let plane = InMemoryControlPlane::new();
//! plane.seed_entity("datapolicies:config:protection-policy", "pp-1", json!({ "name": "p1" }));
//! plane.enqueue_script(TaskScript::new([TaskStatus::Queued, TaskStatus::Succeeded]));
//! assert_eq!(plane.etag_of("pp-1").as_deref(), Some("etag-1"));
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::constants::ETAG_HEADER;
use crate::remote::{ControlPlane, MutationRequest, Operation, ReadResponse, RemoteError};
use crate::types::entity::{EntityKind, EntityRecord, EntityRef};
use crate::types::envelope::{ApiResponse, ResponseData, ResponseMetadata};
use crate::types::task::{
    CompletionDetail, EntityReference, TaskHandle, TaskReference, TaskSnapshot, TaskStatus,
};

/// How a succeeded task reports the entity it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reporting {
    /// A string completion detail with the given name.
    CompletionDetail(String),
    /// An `entitiesAffected` entry with the written entity's kind.
    AffectedEntity,
    /// Nothing at all.
    Nothing,
}

/// Scripted behaviour of one spawned task.
#[derive(Debug, Clone)]
pub struct TaskScript {
    statuses: Vec<TaskStatus>,
    error_message: Option<String>,
    entity_id: Option<String>,
    reporting: Reporting,
    concurrent_child: Option<EntityRecord>,
    fetch_failure_at: Option<usize>,
}

impl Default for TaskScript {
    fn default() -> Self {
        Self::new([TaskStatus::Running, TaskStatus::Succeeded])
    }
}

impl TaskScript {
    /// A script reporting `statuses` in order, then repeating the last one.
    /// Created entities are reported as affected entities.
    pub fn new(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            error_message: None,
            entity_id: None,
            reporting: Reporting::AffectedEntity,
            concurrent_child: None,
            fetch_failure_at: None,
        }
    }

    /// A script that fails after one running tick.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new([TaskStatus::Running, TaskStatus::Failed]).with_error(message)
    }

    /// Error message reported once the task fails.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Identifier assigned to a created entity instead of a random UUID.
    pub fn with_entity_id(mut self, ext_id: impl Into<String>) -> Self {
        self.entity_id = Some(ext_id.into());
        self
    }

    /// How success is reported.
    pub fn with_reporting(mut self, reporting: Reporting) -> Self {
        self.reporting = reporting;
        self
    }

    /// Another actor adds this sub-resource to the same parent while the
    /// task runs.
    pub fn with_concurrent_child(mut self, child: EntityRecord) -> Self {
        self.concurrent_child = Some(child);
        self
    }

    /// Status fetch number `index` (zero-based) fails with a transport error.
    pub fn with_fetch_failure_at(mut self, index: usize) -> Self {
        self.fetch_failure_at = Some(index);
        self
    }

    fn status_at(&self, fetch: usize) -> TaskStatus {
        self.statuses
            .get(fetch)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(TaskStatus::Succeeded)
    }

    fn progress_at(&self, fetch: usize, status: TaskStatus) -> Option<u8> {
        match status {
            TaskStatus::Succeeded => Some(100),
            TaskStatus::Failed | TaskStatus::Canceled => None,
            TaskStatus::Queued | TaskStatus::Pending | TaskStatus::Running => {
                let steps = self.statuses.len().max(1);
                u8::try_from(((fetch + 1) * 100 / (steps + 1)).min(99)).ok()
            },
        }
    }
}

#[derive(Debug)]
struct StoredEntity {
    kind: EntityKind,
    parent: Option<String>,
    fields: Map<String, Value>,
    version: u64,
}

impl StoredEntity {
    fn etag(&self) -> String {
        format!("etag-{}", self.version)
    }
}

#[derive(Debug)]
enum PendingWrite {
    Create {
        ext_id: String,
        kind: EntityKind,
        parent: Option<String>,
        fields: Map<String, Value>,
    },
    Update {
        ext_id: String,
        fields: Map<String, Value>,
    },
    Delete {
        ext_id: String,
    },
}

#[derive(Debug)]
struct ScriptedTask {
    script: TaskScript,
    fetches: usize,
    affected: EntityReference,
    write: Option<PendingWrite>,
    completed_time: Option<DateTime<Utc>>,
}

/// Simulated control plane with tag enforcement and scripted tasks.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    entities: DashMap<String, StoredEntity>,
    tasks: DashMap<TaskHandle, ScriptedTask>,
    scripts: Mutex<VecDeque<TaskScript>>,
    interleaved_writes: Mutex<HashSet<String>>,
    latency: Option<Duration>,
    submissions: AtomicUsize,
    status_fetches: AtomicUsize,
    reads: AtomicUsize,
    listings: AtomicUsize,
}

impl InMemoryControlPlane {
    /// Creates an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds a top-level entity at version 1.
    pub fn seed_entity(
        &self,
        kind: impl Into<EntityKind>,
        ext_id: impl Into<String>,
        fields: Value,
    ) {
        self.insert(kind.into(), ext_id.into(), None, fields);
    }

    /// Adds a sub-resource of `parent` at version 1.
    pub fn seed_child(
        &self,
        parent: &EntityRef,
        kind: impl Into<EntityKind>,
        ext_id: impl Into<String>,
        fields: Value,
    ) {
        self.insert(kind.into(), ext_id.into(), Some(parent.ext_id.clone()), fields);
    }

    /// Queues the script for the next submission.
    pub fn enqueue_script(&self, script: TaskScript) {
        self.scripts.lock().push_back(script);
    }

    /// Another actor writes `ext_id` right after its next read, so the tag
    /// returned by that read is already stale.
    pub fn interleave_external_write(&self, ext_id: impl Into<String>) {
        self.interleaved_writes.lock().insert(ext_id.into());
    }

    /// Current tag of an entity.
    pub fn etag_of(&self, ext_id: &str) -> Option<String> {
        self.entities.get(ext_id).map(|e| e.etag())
    }

    /// Current attributes of an entity.
    pub fn entity(&self, ext_id: &str) -> Option<EntityRecord> {
        self.entities
            .get(ext_id)
            .map(|e| EntityRecord::new(ext_id, e.fields.clone()))
    }

    /// Number of accepted or rejected submissions.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of status fetches.
    pub fn status_fetches(&self) -> usize {
        self.status_fetches.load(Ordering::SeqCst)
    }

    /// Number of single-entity reads.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of collection listings.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn insert(&self, kind: EntityKind, ext_id: String, parent: Option<String>, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.entities.insert(
            ext_id,
            StoredEntity {
                kind,
                parent,
                fields,
                version: 1,
            },
        );
    }

    fn bump(&self, ext_id: &str) {
        if let Some(mut entity) = self.entities.get_mut(ext_id) {
            entity.version += 1;
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_precondition(&self, request: &MutationRequest) -> Result<(), RemoteError> {
        let Some(guarded) = request.guarded_entity() else {
            return Ok(());
        };
        let entity = self
            .entities
            .get(&guarded.ext_id)
            .filter(|e| e.kind == guarded.kind)
            .ok_or_else(|| RemoteError::NotFound {
                what: guarded.to_string(),
            })?;
        let current = entity.etag();
        match request.precondition() {
            Some(tag) if tag == current => Ok(()),
            Some(tag) => Err(RemoteError::PreconditionFailed {
                target: guarded.ext_id,
                message: format!("If-Match {tag} does not match current {current}"),
            }),
            None => Err(RemoteError::PreconditionFailed {
                target: guarded.ext_id,
                message: "If-Match header is required".to_string(),
            }),
        }
    }

    fn apply(&self, write: PendingWrite) {
        match write {
            PendingWrite::Create {
                ext_id,
                kind,
                parent,
                fields,
            } => {
                if let Some(parent) = &parent {
                    self.bump(parent);
                }
                self.entities.insert(
                    ext_id,
                    StoredEntity {
                        kind,
                        parent,
                        fields,
                        version: 1,
                    },
                );
            },
            PendingWrite::Update { ext_id, fields } => {
                if let Some(mut entity) = self.entities.get_mut(&ext_id) {
                    entity.fields.extend(fields);
                    entity.version += 1;
                }
            },
            PendingWrite::Delete { ext_id } => {
                self.entities.remove(&ext_id);
            },
        }
    }
}

fn payload_fields(payload: Value) -> Result<Map<String, Value>, RemoteError> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Validation {
            message: format!("request body must be an object, got {other}"),
        }),
    }
}

fn respond(data: &ResponseData) -> Result<ApiResponse, RemoteError> {
    ApiResponse::new(data).map_err(|e| RemoteError::transport("failed to encode response", e))
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn submit_mutation(&self, request: MutationRequest) -> Result<ApiResponse, RemoteError> {
        self.simulate_latency().await;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.check_precondition(&request)?;

        let fields = match request.operation {
            Operation::Create | Operation::Update => payload_fields(request.payload)?,
            Operation::Delete => Map::new(),
        };

        // Rejected submissions leave the script queue untouched.
        let script = self.scripts.lock().pop_front().unwrap_or_default();
        let (affected, write) = match request.operation {
            Operation::Create => {
                let ext_id = script
                    .entity_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                (
                    EntityReference::new(request.kind.clone(), ext_id.clone()),
                    PendingWrite::Create {
                        ext_id,
                        kind: request.kind,
                        parent: request.parent.map(|p| p.ext_id),
                        fields,
                    },
                )
            },
            Operation::Update => {
                let ext_id = request.target.unwrap_or_default();
                (
                    EntityReference::new(request.kind, ext_id.clone()),
                    PendingWrite::Update { ext_id, fields },
                )
            },
            Operation::Delete => {
                let ext_id = request.target.unwrap_or_default();
                (
                    EntityReference::new(request.kind, ext_id.clone()),
                    PendingWrite::Delete { ext_id },
                )
            },
        };

        let handle = TaskHandle::new(format!("task-{}", uuid::Uuid::new_v4()));
        tracing::debug!(task_id = %handle, entity = %affected.ext_id, "spawned simulated task");
        self.tasks.insert(
            handle.clone(),
            ScriptedTask {
                script,
                fetches: 0,
                affected,
                write: Some(write),
                completed_time: None,
            },
        );

        respond(&ResponseData::TaskReference(TaskReference { ext_id: handle }))
    }

    async fn get_task(&self, handle: &TaskHandle) -> Result<ApiResponse, RemoteError> {
        self.simulate_latency().await;
        self.status_fetches.fetch_add(1, Ordering::SeqCst);

        let (snapshot, write, concurrent_child) = {
            let mut task = self.tasks.get_mut(handle).ok_or_else(|| RemoteError::NotFound {
                what: format!("task {handle}"),
            })?;
            let fetch = task.fetches;
            task.fetches += 1;
            if task.script.fetch_failure_at == Some(fetch) {
                return Err(RemoteError::Transport {
                    message: format!("status fetch {fetch} of task {handle} dropped"),
                    source: None,
                });
            }

            let status = task.script.status_at(fetch);
            let mut snapshot = TaskSnapshot::new(handle.clone(), status);
            snapshot.progress_percentage = task.script.progress_at(fetch, status);

            if status.is_terminal() && task.completed_time.is_none() {
                task.completed_time = Some(Utc::now());
            }
            snapshot.completed_time = task.completed_time;

            let mut write = None;
            let mut concurrent_child = None;
            match status {
                TaskStatus::Succeeded => {
                    write = task.write.take();
                    if write.is_some() {
                        concurrent_child = task.script.concurrent_child.take();
                    }
                    snapshot = match &task.script.reporting {
                        Reporting::CompletionDetail(name) => snapshot.with_completion_detail(
                            CompletionDetail::text(name.clone(), task.affected.ext_id.clone()),
                        ),
                        Reporting::AffectedEntity => {
                            snapshot.with_affected_entity(task.affected.clone())
                        },
                        Reporting::Nothing => snapshot,
                    };
                },
                TaskStatus::Failed | TaskStatus::Canceled => {
                    if let Some(message) = &task.script.error_message {
                        snapshot = snapshot.with_error(message.clone());
                    }
                },
                TaskStatus::Queued | TaskStatus::Pending | TaskStatus::Running => {},
            }
            (snapshot, write, concurrent_child)
        };

        if let Some(write) = write {
            let created_under = match &write {
                PendingWrite::Create {
                    parent: Some(parent),
                    kind,
                    ..
                } => Some((parent.clone(), kind.clone())),
                _ => None,
            };
            self.apply(write);
            if let (Some((parent, kind)), Some(child)) = (created_under, concurrent_child) {
                self.apply(PendingWrite::Create {
                    ext_id: child.ext_id,
                    kind,
                    parent: Some(parent),
                    fields: child.fields,
                });
            }
        }

        respond(&ResponseData::Task(snapshot))
    }

    async fn read_entity(&self, target: &EntityRef) -> Result<ReadResponse, RemoteError> {
        self.simulate_latency().await;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let response = {
            let entity = self
                .entities
                .get(&target.ext_id)
                .filter(|e| e.kind == target.kind)
                .ok_or_else(|| RemoteError::NotFound {
                    what: target.to_string(),
                })?;
            let record = EntityRecord::new(target.ext_id.clone(), entity.fields.clone());
            ReadResponse::new(respond(&ResponseData::Entity(record))?)
                .with_header(ETAG_HEADER, entity.etag())
        };

        if self.interleaved_writes.lock().remove(&target.ext_id) {
            tracing::debug!(entity = %target, "external actor modified entity after read");
            self.bump(&target.ext_id);
        }
        Ok(response)
    }

    async fn list_children(
        &self,
        parent: &EntityRef,
        kind: &EntityKind,
    ) -> Result<ApiResponse, RemoteError> {
        self.simulate_latency().await;
        self.listings.fetch_add(1, Ordering::SeqCst);

        if !self.entities.contains_key(&parent.ext_id) {
            return Err(RemoteError::NotFound {
                what: parent.to_string(),
            });
        }
        let mut children: Vec<EntityRecord> = self
            .entities
            .iter()
            .filter(|e| e.kind == *kind && e.parent.as_deref() == Some(parent.ext_id.as_str()))
            .map(|e| EntityRecord::new(e.key().clone(), e.fields.clone()))
            .collect();
        children.sort_by(|a, b| a.ext_id.cmp(&b.ext_id));

        let mut response = respond(&ResponseData::EntityList(children.clone()))?;
        response.metadata = Some(ResponseMetadata {
            total_available_results: Some(children.len() as u64),
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const POLICY: &str = "datapolicies:config:protection-policy";

    #[tokio::test]
    async fn stale_tag_is_rejected_at_submission() {
        let plane = InMemoryControlPlane::new();
        plane.seed_entity(POLICY, "pp-1", json!({ "name": "p1" }));

        let request = crate::tag::EntityTag::new("etag-0")
            .attach_to(MutationRequest::update(EntityRef::new(POLICY, "pp-1"), json!({})));
        let err = plane.submit_mutation(request).await.unwrap_err();
        assert!(matches!(err, RemoteError::PreconditionFailed { .. }));
        assert_eq!(plane.submissions(), 1);
    }

    #[tokio::test]
    async fn update_is_applied_when_success_is_reported() {
        let plane = InMemoryControlPlane::new();
        plane.seed_entity(POLICY, "pp-1", json!({ "name": "p1" }));

        let request = crate::tag::EntityTag::new("etag-1").attach_to(MutationRequest::update(
            EntityRef::new(POLICY, "pp-1"),
            json!({ "name": "p2" }),
        ));
        let handle = plane
            .submit_mutation(request)
            .await
            .unwrap()
            .into_task_reference()
            .unwrap()
            .ext_id;

        let first = plane.get_task(&handle).await.unwrap().into_task().unwrap();
        assert_eq!(first.status().unwrap(), TaskStatus::Running);
        assert_eq!(plane.etag_of("pp-1").as_deref(), Some("etag-1"));

        let second = plane.get_task(&handle).await.unwrap().into_task().unwrap();
        assert_eq!(second.status().unwrap(), TaskStatus::Succeeded);
        assert_eq!(plane.etag_of("pp-1").as_deref(), Some("etag-2"));
        assert_eq!(plane.entity("pp-1").unwrap().field("/name"), Some(&json!("p2")));

        let third = plane.get_task(&handle).await.unwrap().into_task().unwrap();
        assert_eq!(third, second);
    }

    #[tokio::test]
    async fn interleaved_write_invalidates_the_tag_just_read() {
        let plane = InMemoryControlPlane::new();
        plane.seed_entity(POLICY, "pp-1", json!({}));
        plane.interleave_external_write("pp-1");

        let read = plane.read_entity(&EntityRef::new(POLICY, "pp-1")).await.unwrap();
        assert_eq!(read.header(ETAG_HEADER), Some("etag-1"));
        assert_eq!(plane.etag_of("pp-1").as_deref(), Some("etag-2"));
    }

    #[tokio::test]
    async fn rejected_payload_keeps_the_queued_script() {
        let plane = InMemoryControlPlane::new();
        plane.enqueue_script(TaskScript::default().with_entity_id("kept"));

        let rejected = MutationRequest::create(EntityKind::from(POLICY), json!("not an object"));
        let err = plane
            .submit_mutation(rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Validation { .. }));

        let accepted = MutationRequest::create(EntityKind::from(POLICY), json!({ "name": "p1" }));
        let reference = plane
            .submit_mutation(accepted)
            .await
            .unwrap()
            .into_task_reference()
            .unwrap();
        for _ in 0..2 {
            plane.get_task(&reference.ext_id).await.unwrap();
        }
        assert!(plane.entity("kept").is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let plane = InMemoryControlPlane::new();
        let err = plane.get_task(&TaskHandle::from("nope")).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }
}
