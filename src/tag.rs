//! Entity tags for optimistic concurrency.
//!
//! Every update or delete (and every sub-resource create, which modifies its
//! parent) carries the tag of a read made immediately before it. The server
//! rejects the write when the tag is stale.
//!
//! [`EntityTag`] is deliberately neither `Clone` nor `Copy`: attaching it to a
//! request consumes it, so a tag cannot be reused for a second write.
//!
//! ```compile_fail
//! use prism_tasks::EntityTag;
//!
//! let tag = EntityTag::new("etag-1");
//! let again = tag.clone();
//! ```

use std::fmt;

use crate::constants::ETAG_HEADER;
use crate::error::OrchestrationError;
use crate::remote::{MutationRequest, ReadResponse};
use crate::types::entity::EntityRef;

/// Opaque concurrency tag captured from a read.
///
/// # Examples
///
/// ```
/// use prism_tasks::remote::MutationRequest;
/// use prism_tasks::{EntityRef, EntityTag};
///
/// let target = EntityRef::new("datapolicies:config:protection-policy", "pp-1");
/// let request = EntityTag::new("etag-4").attach_to(MutationRequest::delete(target));
/// assert_eq!(request.precondition(), Some("etag-4"));
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct EntityTag(String);

impl EntityTag {
    /// Wraps a raw tag value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw tag value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pulls the tag out of the `ETag` header of a read of `target`.
    ///
    /// # Errors
    ///
    /// [`OrchestrationError::MissingEntityTag`] if the header is absent or
    /// blank.
    pub fn extract(
        target: &EntityRef,
        response: &ReadResponse,
    ) -> Result<Self, OrchestrationError> {
        match response.header(ETAG_HEADER).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(Self::new(value)),
            _ => Err(OrchestrationError::MissingEntityTag {
                target: target.clone(),
            }),
        }
    }

    /// Places the tag into the request's `If-Match` precondition.
    pub fn attach_to(self, mut request: MutationRequest) -> MutationRequest {
        request.if_match = Some(self);
        request
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
