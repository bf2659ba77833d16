//! Error type for `journey-playbook`.

use thiserror::Error;

use crate::validate::ValidationIssue;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed playbook document: {0}")]
  Json(#[from] serde_json::Error),

  #[error("playbook is invalid ({} issue(s))", .0.len())]
  Invalid(Vec<ValidationIssue>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for journey_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Json(e) => journey_core::Error::Validation(vec![e.to_string()]),
      Error::Invalid(issues) => {
        journey_core::Error::Validation(issues.iter().map(ToString::to_string).collect())
      }
    }
  }
}
