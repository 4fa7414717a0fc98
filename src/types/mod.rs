//! Wire and domain types.
//!
//! - [`entity`]: entity identity ([`EntityKind`], [`EntityRef`], [`EntityRecord`])
//! - [`task`]: task status, snapshots and completion records
//! - [`envelope`]: polymorphic envelopes and the top-level response
//! - [`retention`]: protection policy retention union
//! - [`enums`]: integer-coded enumerations

pub mod entity;
pub mod enums;
pub mod envelope;
pub mod retention;
pub mod task;

pub use entity::{EntityKind, EntityRecord, EntityRef};
pub use enums::{CodedEnum, DiskBusType, WithUnknown};
pub use envelope::{
    ApiResponse, Discriminator, EnvelopeError, OneOf, PolymorphicValue, ResponseData,
};
pub use retention::ScheduleRetention;
pub use task::{
    CompletionDetail, CompletionRecord, CompletionValue, EntityReference, ErrorMessage,
    TaskHandle, TaskReference, TaskSnapshot, TaskStatus,
};
