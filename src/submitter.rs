//! Mutation submission.
//!
//! Creates go through [`MutationSubmitter::submit_create`]. Anything that
//! needs a precondition goes through [`MutationSubmitter::submit_with_tag`],
//! which takes the [`EntityTag`] by value: a tagged write cannot be issued
//! without a tag, and a tag cannot be issued twice.

use serde_json::Value;

use crate::error::OrchestrationError;
use crate::remote::{ControlPlane, MutationRequest, RemoteError};
use crate::tag::EntityTag;
use crate::types::entity::{EntityKind, EntityRef};
use crate::types::task::TaskHandle;

/// A write that must carry an entity tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedWrite {
    /// Modify `target`.
    Update {
        /// Entity to modify.
        target: EntityRef,
        /// Request body.
        payload: Value,
    },
    /// Remove `target`.
    Delete {
        /// Entity to remove.
        target: EntityRef,
    },
    /// Create a sub-resource of `parent`, guarded by the parent's tag.
    CreateChild {
        /// Owning entity.
        parent: EntityRef,
        /// Kind of the sub-resource.
        kind: EntityKind,
        /// Request body.
        payload: Value,
    },
}

impl TaggedWrite {
    /// The entity whose tag guards the write.
    pub fn guarded_entity(&self) -> &EntityRef {
        match self {
            Self::Update { target, .. } | Self::Delete { target } => target,
            Self::CreateChild { parent, .. } => parent,
        }
    }

    fn into_request(self) -> MutationRequest {
        match self {
            Self::Update { target, payload } => MutationRequest::update(target, payload),
            Self::Delete { target } => MutationRequest::delete(target),
            Self::CreateChild {
                parent,
                kind,
                payload,
            } => MutationRequest::create_child(parent, kind, payload),
        }
    }
}

/// Issues writes and returns the handle of the spawned task.
pub struct MutationSubmitter<'a> {
    api: &'a dyn ControlPlane,
}

impl<'a> MutationSubmitter<'a> {
    /// Creates a submitter over `api`.
    pub fn new(api: &'a dyn ControlPlane) -> Self {
        Self { api }
    }

    /// Submits an untagged create.
    ///
    /// # Errors
    ///
    /// [`OrchestrationError::SubmissionFailed`] on any remote failure, or a
    /// decode error if the response is not a task reference.
    pub async fn submit_create(
        &self,
        kind: &EntityKind,
        payload: Value,
    ) -> Result<TaskHandle, OrchestrationError> {
        self.submit(MutationRequest::create(kind.clone(), payload), None)
            .await
    }

    /// Submits a write guarded by `tag`.
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::ConcurrentModification`] if the server
    ///   reports the tag as stale.
    /// - [`OrchestrationError::SubmissionFailed`] on any other remote failure.
    /// - A decode error if the response is not a task reference.
    pub async fn submit_with_tag(
        &self,
        write: TaggedWrite,
        tag: EntityTag,
    ) -> Result<TaskHandle, OrchestrationError> {
        let guarded = write.guarded_entity().clone();
        self.submit(tag.attach_to(write.into_request()), Some(guarded))
            .await
    }

    async fn submit(
        &self,
        request: MutationRequest,
        guarded: Option<EntityRef>,
    ) -> Result<TaskHandle, OrchestrationError> {
        let operation = request.operation;
        let kind = request.kind.clone();
        tracing::debug!(%operation, %kind, tagged = guarded.is_some(), "submitting mutation");

        let response = match self.api.submit_mutation(request).await {
            Ok(response) => response,
            Err(RemoteError::PreconditionFailed { target, message }) => {
                let target = guarded.unwrap_or_else(|| EntityRef::new(kind, target));
                tracing::warn!(entity = %target, %message, "write rejected: stale entity tag");
                return Err(OrchestrationError::ConcurrentModification { target, message });
            },
            Err(source) => {
                tracing::warn!(%operation, %kind, error = %source, "mutation submission failed");
                return Err(OrchestrationError::SubmissionFailed {
                    operation,
                    kind,
                    source,
                });
            },
        };

        let handle = response.into_task_reference()?.ext_id;
        tracing::debug!(task_id = %handle, %operation, "mutation accepted");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::remote::memory::InMemoryControlPlane;
    use serde_json::json;

    const POLICY: &str = "datapolicies:config:protection-policy";

    #[tokio::test]
    async fn create_returns_handle() {
        let plane = InMemoryControlPlane::new();
        let submitter = MutationSubmitter::new(&plane);
        let handle = submitter
            .submit_create(&EntityKind::from(POLICY), json!({ "name": "p1" }))
            .await
            .unwrap();
        assert!(handle.as_str().starts_with("task-"));
        assert_eq!(plane.submissions(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_a_submission_failure() {
        let plane = InMemoryControlPlane::new();
        let submitter = MutationSubmitter::new(&plane);
        let err = submitter
            .submit_create(&EntityKind::from(POLICY), json!("not an object"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubmissionFailed);
        assert!(err.task_handle().is_none());
    }

    #[tokio::test]
    async fn stale_tag_is_a_concurrent_modification() {
        let plane = InMemoryControlPlane::new();
        plane.seed_entity(POLICY, "pp-1", json!({}));
        let submitter = MutationSubmitter::new(&plane);

        let err = submitter
            .submit_with_tag(
                TaggedWrite::Delete {
                    target: EntityRef::new(POLICY, "pp-1"),
                },
                EntityTag::new("etag-9"),
            )
            .await
            .unwrap_err();
        match err {
            OrchestrationError::ConcurrentModification { target, .. } => {
                assert_eq!(target, EntityRef::new(POLICY, "pp-1"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
