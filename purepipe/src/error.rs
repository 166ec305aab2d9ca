// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors raised by stages and by the wiring between them.
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::stage::StageId;

/// Error type user callbacks of sources, transforms and sinks may return.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Where a failure originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Raised by a source or transform while producing a record.
    Production,

    /// Raised by a sink while accepting a record.
    Consumption,

    /// A pipe could not be built or a neighbouring stage went away.
    Wiring,
}

/// Failure of a stage.
///
/// The error is cheap to clone, all clones refer to the same underlying failure. This is how a
/// single failure is delivered unchanged to every observer of a composition: the terminal
/// stage, the facade of a wrapped composite and the teardown of all other stages.
#[derive(Clone, Error)]
#[error("{inner}")]
pub struct StageError {
    kind: ErrorKind,
    inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl StageError {
    pub fn new(kind: ErrorKind, err: impl Into<BoxError>) -> Self {
        Self {
            kind,
            inner: Arc::from(err.into()),
        }
    }

    pub fn production(err: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Production, err)
    }

    pub fn consumption(err: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Consumption, err)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error originally raised by the failing stage.
    pub fn get_ref(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.inner
    }

    /// Returns true if both values are clones of the very same failure.
    pub fn ptr_eq(&self, other: &StageError) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageError")
            .field("kind", &self.kind)
            .field("message", &self.inner.to_string())
            .finish()
    }
}

impl From<WiringError> for StageError {
    fn from(err: WiringError) -> Self {
        Self::new(ErrorKind::Wiring, err)
    }
}

/// Errors from connecting stages or from talking to a stage through the wrong side.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error("stage {0} is not readable")]
    NotReadable(StageId),

    #[error("stage {0} is not writable")]
    NotWritable(StageId),

    #[error("output of stage {0} was already taken")]
    OutputTaken(StageId),

    #[error("stage {0} does not accept input anymore")]
    Closed(StageId),

    #[error("output of stage {0} is not consumed anymore")]
    Detached(StageId),
}
