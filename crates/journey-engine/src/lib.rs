//! The journey engine: playbook registry, node instance lifecycle, evidence,
//! reviews and notifications, on top of any [`JourneyStore`] backend.
//!
//! [`JourneyStore`]: journey_core::store::JourneyStore
//!
//! # Quick start
//!
//! ```no_run
//! # async fn run(
//! #   engine: journey_engine::Engine<
//! #     impl journey_core::store::JourneyStore<Error = journey_core::Error> + Clone,
//! #     impl journey_core::collaborator::Identity,
//! #     impl journey_core::collaborator::Notifier,
//! #     impl journey_core::collaborator::DocumentStore,
//! #   >,
//! #   raw: &str,
//! # ) -> journey_core::Result<()> {
//! use journey_engine::OpenRequest;
//!
//! let student = engine.actor("session-token").await?;
//! engine.publish_playbook(student.tenant_id, raw).await?;
//! let opened = engine.open(&student, OpenRequest::new(student.user_id, "profile")).await?;
//! engine
//!   .save_form(&student, opened.instance.instance_id, serde_json::json!({ "name": "Ada" }))
//!   .await?;
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod config;
pub mod deadline;
pub mod emitter;
mod engine;
pub mod orchestrate;
pub mod registry;
pub mod retry;
mod view;

pub use config::{EngineConfig, RetryPolicy};
pub use deadline::Deadline;
pub use engine::{Engine, OpenRequest};
pub use orchestrate::{Advance, open_successors};
pub use registry::{PlaybookRegistry, validate_playbook};
pub use retry::with_retry;
pub use view::{SlotView, Submission};

#[cfg(test)]
mod tests;
