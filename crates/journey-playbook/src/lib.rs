//! Playbook documents for the journey core.
//!
//! Parses the JSON playbook format, validates its structure, and builds the
//! indexed [`PlaybookVersion`] the engine consults. Pure synchronous; no
//! database dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use journey_playbook::{parse, validate};
//!
//! let raw = r#"{"playbook_id":"phd","version":"1","worlds":[{"id":"w1","nodes":[{"id":"profile"}]}]}"#;
//! let doc = parse(raw).unwrap();
//! assert!(validate(&doc).is_ok());
//! ```

pub mod condition;
pub mod document;
pub mod error;
mod validate;
mod version;

use sha2::{Digest, Sha256};

pub use condition::Condition;
pub use document::{PlaybookDocument, Timer, TimerStart};
pub use error::{Error, Result};
pub use validate::{MAX_TIMER_DAYS, ValidationIssue, validate};
pub use version::{NodeDefinition, OutcomeDef, PlaybookVersion};

/// Parse a playbook document without validating it.
pub fn parse(raw: &str) -> Result<PlaybookDocument> { Ok(serde_json::from_str(raw)?) }

/// Parse and validate, returning the document only if it is publishable.
pub fn load(raw: &str) -> Result<PlaybookDocument> {
  let doc = parse(raw)?;
  validate(&doc).map_err(Error::Invalid)?;
  Ok(doc)
}

/// Content hash identifying a playbook version: hex SHA-256 of the raw bytes.
pub fn checksum(raw: &[u8]) -> String { hex::encode(Sha256::digest(raw)) }
