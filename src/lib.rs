//! Asynchronous mutation orchestration for an infrastructure control plane.
//!
//! Every create, update and delete against the control plane follows one
//! pattern: submit a change, receive a handle to a background task, poll the
//! task to a terminal status, then correlate the result back to the entity
//! it affected. This crate implements that pattern once.
//!
//! # Overview
//!
//! ```text
//! MutationOrchestrator
//!   ├── EntityTag          read-then-write concurrency tags
//!   ├── MutationSubmitter  create / tagged write -> TaskHandle
//!   ├── TaskPoller         PollState machine, backoff, deadline, cancellation
//!   └── CompletionCorrelator
//!         completion detail / affected entity / collection diff -> entity id
//! ```
//!
//! The remote API is abstracted by [`ControlPlane`];
//! [`InMemoryControlPlane`](remote::memory::InMemoryControlPlane) simulates
//! it in-process.
//!
//! # Module Organization
//!
//! - [`types`] - Task, entity and polymorphic envelope types
//! - [`error`] - [`OrchestrationError`] taxonomy
//! - [`tag`] - [`EntityTag`] extraction and attachment
//! - [`remote`] - [`ControlPlane`] trait and the simulated control plane
//! - [`submitter`], [`poller`], [`correlator`] - the three stages
//! - [`orchestrator`] - [`MutationOrchestrator`], the entry point
//! - [`config`] - [`OrchestratorConfig`] from TOML and environment
//! - [`constants`] - header names, defaults, relation kinds
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use prism_tasks::constants::{COMPLETION_DETAIL_PROTECTION_POLICY, REL_PROTECTION_POLICY};
//! use prism_tasks::remote::memory::{InMemoryControlPlane, Reporting, TaskScript};
//! use prism_tasks::{Mutation, MutationOrchestrator, OrchestratorConfig, TaskStatus};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let plane = Arc::new(InMemoryControlPlane::new());
//! plane.enqueue_script(
//!     TaskScript::new([TaskStatus::Queued, TaskStatus::Succeeded])
//!         .with_entity_id("abc-123")
//!         .with_reporting(Reporting::CompletionDetail(
//!             COMPLETION_DETAIL_PROTECTION_POLICY.to_string(),
//!         )),
//! );
//!
//! let orchestrator = MutationOrchestrator::new(plane)
//!     .with_config(OrchestratorConfig::default().with_poll_interval_ms(10));
//! let mutation = Mutation::create(REL_PROTECTION_POLICY, json!({ "name": "p1" }))
//!     .with_completion_detail(COMPLETION_DETAIL_PROTECTION_POLICY);
//!
//! assert_eq!(orchestrator.execute(mutation).await.unwrap(), "abc-123");
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod correlator;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod orchestrator;
pub mod poller;
pub mod remote;
pub mod submitter;
pub mod tag;
pub mod types;

pub use config::{ConfigError, OrchestratorConfig};
pub use correlator::{
    CollectionSnapshot, CompletionCorrelator, Correlation, CorrelationPath, OperationContext,
    SecondaryKey,
};
pub use error::{ErrorKind, OrchestrationError};
#[cfg(feature = "logging")]
pub use logging::init_logging;
pub use orchestrator::{Mutation, MutationOrchestrator};
pub use poller::{PollSchedule, PollState, TaskPoller};
pub use remote::{ControlPlane, MutationRequest, Operation, ReadResponse, RemoteError};
pub use submitter::{MutationSubmitter, TaggedWrite};
pub use tag::EntityTag;
pub use types::*;
