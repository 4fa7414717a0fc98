//! The single entry point for mutations.
//!
//! [`MutationOrchestrator::execute`] runs the whole sequence:
//!
//! 1. for tagged writes, read the guarded entity and extract its tag
//!    (and, for sub-resource creates, then snapshot the parent collection);
//! 2. submit the write;
//! 3. poll the task to a terminal status;
//! 4. correlate the completion record to an entity id.
//!
//! The deadline covers steps 2 to 4. A deadline that fires after submission
//! reports the task handle and, if polling finished, the terminal status.
//! Nothing is retried: a stale tag, a
//! failed task or an ambiguous correlation is returned to the caller, who
//! alone knows whether resubmitting is safe.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::correlator::{CollectionSnapshot, CompletionCorrelator, OperationContext, SecondaryKey};
use crate::error::OrchestrationError;
use crate::poller::TaskPoller;
use crate::remote::{ControlPlane, Operation};
use crate::submitter::{MutationSubmitter, TaggedWrite};
use crate::tag::EntityTag;
use crate::types::entity::{EntityKind, EntityRef};
use crate::types::task::{TaskHandle, TaskStatus};

/// A requested change.
///
/// # Examples
///
/// ```
/// use prism_tasks::constants::{COMPLETION_DETAIL_PROTECTION_POLICY, REL_PROTECTION_POLICY};
/// use prism_tasks::Mutation;
/// use prism_tasks::remote::Operation;
/// use serde_json::json;
///
/// let create = Mutation::create(REL_PROTECTION_POLICY, json!({ "name": "p1" }))
///     .with_completion_detail(COMPLETION_DETAIL_PROTECTION_POLICY);
/// assert_eq!(create.operation(), Operation::Create);
/// assert_eq!(create.kind().as_str(), REL_PROTECTION_POLICY);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create a top-level entity.
    Create {
        /// Kind of the new entity.
        kind: EntityKind,
        /// Request body.
        payload: Value,
        /// Completion detail carrying the new id, if the task reports one.
        completion_detail: Option<String>,
    },
    /// Modify an entity.
    Update {
        /// Entity to modify.
        target: EntityRef,
        /// Request body.
        payload: Value,
    },
    /// Remove an entity.
    Delete {
        /// Entity to remove.
        target: EntityRef,
    },
    /// Create a sub-resource under a parent, guarded by the parent's tag.
    CreateChild {
        /// Owning entity.
        parent: EntityRef,
        /// Kind of the sub-resource.
        kind: EntityKind,
        /// Request body.
        payload: Value,
        /// Attributes identifying the new member if the task does not
        /// report its id.
        key: SecondaryKey,
    },
}

impl Mutation {
    /// A top-level create.
    pub fn create(kind: impl Into<EntityKind>, payload: Value) -> Self {
        Self::Create {
            kind: kind.into(),
            payload,
            completion_detail: None,
        }
    }

    /// An update of `target`.
    pub fn update(target: EntityRef, payload: Value) -> Self {
        Self::Update { target, payload }
    }

    /// A delete of `target`.
    pub fn delete(target: EntityRef) -> Self {
        Self::Delete { target }
    }

    /// A sub-resource create under `parent`.
    pub fn create_child(
        parent: EntityRef,
        kind: impl Into<EntityKind>,
        payload: Value,
        key: SecondaryKey,
    ) -> Self {
        Self::CreateChild {
            parent,
            kind: kind.into(),
            payload,
            key,
        }
    }

    /// Names the completion detail carrying a created entity's id. No effect
    /// on other mutations.
    pub fn with_completion_detail(mut self, name: impl Into<String>) -> Self {
        if let Self::Create {
            completion_detail, ..
        } = &mut self
        {
            *completion_detail = Some(name.into());
        }
        self
    }

    /// The operation this mutation performs.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create { .. } | Self::CreateChild { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    /// Kind of the entity produced or touched.
    pub fn kind(&self) -> &EntityKind {
        match self {
            Self::Create { kind, .. } | Self::CreateChild { kind, .. } => kind,
            Self::Update { target, .. } | Self::Delete { target } => &target.kind,
        }
    }
}

enum Submission {
    Create { kind: EntityKind, payload: Value },
    Tagged { write: TaggedWrite, tag: EntityTag },
}

/// What a run had reached when its deadline fired.
#[derive(Default)]
struct Progress {
    handle: Option<TaskHandle>,
    last_status: Option<TaskStatus>,
}

/// Submits, awaits and correlates mutations against a [`ControlPlane`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use prism_tasks::remote::memory::InMemoryControlPlane;
/// use prism_tasks::{EntityRef, Mutation, MutationOrchestrator};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let plane = Arc::new(InMemoryControlPlane::new());
/// plane.seed_entity("networking:config:subnet", "sn-1", json!({ "name": "a" }));
///
/// let orchestrator = MutationOrchestrator::new(plane.clone());
/// let target = EntityRef::new("networking:config:subnet", "sn-1");
/// let id = orchestrator.execute(Mutation::update(target, json!({ "name": "b" }))).await.unwrap();
///
/// assert_eq!(id, "sn-1");
/// assert_eq!(plane.etag_of("sn-1").as_deref(), Some("etag-2"));
/// # }
/// ```
pub struct MutationOrchestrator {
    api: Arc<dyn ControlPlane>,
    config: OrchestratorConfig,
}

impl MutationOrchestrator {
    /// Creates an orchestrator with default settings.
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self {
            api,
            config: OrchestratorConfig::default(),
        }
    }

    /// Replaces the settings.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs `mutation` with the configured deadline for its operation and
    /// returns the id of the entity produced or touched.
    ///
    /// # Errors
    ///
    /// Any [`OrchestrationError`]; see the module documentation for which
    /// step produces which.
    pub async fn execute(&self, mutation: Mutation) -> Result<String, OrchestrationError> {
        let timeout = self.config.timeout_for(mutation.operation());
        self.execute_with_timeout(mutation, timeout).await
    }

    /// Like [`execute`](Self::execute) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with_timeout(
        &self,
        mutation: Mutation,
        timeout: Duration,
    ) -> Result<String, OrchestrationError> {
        self.execute_with_cancel(mutation, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`execute_with_timeout`](Self::execute_with_timeout), abandoning
    /// the wait when `cancel` fires. An abandoned wait is
    /// [`OrchestrationError::Cancelled`]: the task's outcome is unknown.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with_cancel(
        &self,
        mutation: Mutation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestrationError> {
        let operation = mutation.operation();
        let kind = mutation.kind().clone();
        tracing::debug!(
            %operation,
            %kind,
            timeout_ms = timeout.as_millis() as u64,
            "orchestrating mutation"
        );

        let (submission, context) = self.prepare(mutation).await?;
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled {
                handle: None,
                last_status: None,
            });
        }

        let deadline = deadline_after(timeout);
        let mut progress = Progress::default();
        let work = async {
            let api = &*self.api;
            let submitter = MutationSubmitter::new(api);
            let handle = match submission {
                Submission::Create { kind, payload } => {
                    submitter.submit_create(&kind, payload).await?
                },
                Submission::Tagged { write, tag } => submitter.submit_with_tag(write, tag).await?,
            };
            progress.handle = Some(handle.clone());

            let record = TaskPoller::new(api)
                .with_schedule(self.config.poll_schedule())
                .await_completion(&handle, deadline, cancel)
                .await?;
            progress.last_status = Some(record.status());

            let correlation = CompletionCorrelator::new(api)
                .correlate(&record, &context)
                .await?;
            tracing::info!(
                task_id = %handle,
                %operation,
                %kind,
                entity = %correlation.ext_id,
                path = %correlation.path,
                "mutation completed"
            );
            Ok(correlation.ext_id)
        };

        let outcome = tokio::time::timeout_at(deadline, work).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                match &progress.handle {
                    Some(handle) => tracing::warn!(
                        task_id = %handle,
                        %operation,
                        %kind,
                        status = ?progress.last_status,
                        "deadline reached before the result was correlated"
                    ),
                    None => tracing::warn!(
                        %operation,
                        %kind,
                        "deadline reached before a task handle was obtained"
                    ),
                }
                Err(OrchestrationError::Timeout {
                    handle: progress.handle,
                    last_status: progress.last_status,
                    waited: timeout,
                })
            },
        }
    }

    async fn prepare(
        &self,
        mutation: Mutation,
    ) -> Result<(Submission, OperationContext), OrchestrationError> {
        match mutation {
            Mutation::Create {
                kind,
                payload,
                completion_detail,
            } => {
                let mut context = OperationContext::new(kind.clone());
                if let Some(name) = completion_detail {
                    context = context.with_completion_detail(name);
                }
                Ok((Submission::Create { kind, payload }, context))
            },
            Mutation::Update { target, payload } => {
                let tag = self.read_tag(&target).await?;
                let context =
                    OperationContext::new(target.kind.clone()).with_target(target.ext_id.clone());
                Ok((
                    Submission::Tagged {
                        write: TaggedWrite::Update { target, payload },
                        tag,
                    },
                    context,
                ))
            },
            Mutation::Delete { target } => {
                let tag = self.read_tag(&target).await?;
                let context =
                    OperationContext::new(target.kind.clone()).with_target(target.ext_id.clone());
                Ok((
                    Submission::Tagged {
                        write: TaggedWrite::Delete { target },
                        tag,
                    },
                    context,
                ))
            },
            Mutation::CreateChild {
                parent,
                kind,
                payload,
                key,
            } => {
                // Snapshot after the tag read; siblings added in between fail If-Match.
                let tag = self.read_tag(&parent).await?;
                let snapshot =
                    CollectionSnapshot::capture(&*self.api, parent.clone(), kind.clone(), key)
                        .await?;
                let context = OperationContext::new(kind.clone())
                    .excluding(parent.ext_id.clone())
                    .with_fallback(snapshot);
                Ok((
                    Submission::Tagged {
                        write: TaggedWrite::CreateChild {
                            parent,
                            kind,
                            payload,
                        },
                        tag,
                    },
                    context,
                ))
            },
        }
    }

    async fn read_tag(&self, target: &EntityRef) -> Result<EntityTag, OrchestrationError> {
        let response = self.api.read_entity(target).await.map_err(|source| {
            tracing::warn!(entity = %target, error = %source, "read before write failed");
            OrchestrationError::ReadFailed {
                target: target.clone(),
                source,
            }
        })?;
        EntityTag::extract(target, &response)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_detail_only_applies_to_creates() {
        let target = EntityRef::new("vmm:ahv:config:vm", "vm-1");
        let delete = Mutation::delete(target.clone()).with_completion_detail("vmExtId");
        assert_eq!(delete, Mutation::delete(target));
    }

    #[test]
    fn child_creates_are_creates_of_the_child_kind() {
        let mutation = Mutation::create_child(
            EntityRef::new("vmm:ahv:config:vm", "vm-1"),
            "vmm:ahv:config:vm:disk",
            json!({}),
            SecondaryKey::new(),
        );
        assert_eq!(mutation.operation(), Operation::Create);
        assert_eq!(mutation.kind().as_str(), "vmm:ahv:config:vm:disk");
    }
}
