use thiserror::Error;

/// A write rejected by a [`SimpleFacility`](crate::SimpleFacility).
///
/// The message is surfaced to callers verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct WriteError(pub String);
