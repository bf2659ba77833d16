//! Core types and trait definitions for the journey execution core.
//!
//! This crate is deliberately free of database and I/O dependencies. It owns
//! the domain model (instances, evidence, form revisions, outcomes, events),
//! the transition table, the error taxonomy, and the traits through which the
//! engine reaches storage and external collaborators.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod collaborator;
pub mod error;
pub mod event;
pub mod instance;
pub mod playbook;
pub mod state;
pub mod store;
pub mod submission;

pub use error::{Error, ErrorKind, Result};
