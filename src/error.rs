use log::{debug, error};
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a store operation can surface to its caller.
///
/// Expected outcomes such as "this voting ID is unknown" are usually returned as
/// typed enums by the stores themselves; the `NotFound` and `AlreadyUsed` variants
/// exist for callers that want to short-circuit on them with `?`.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend is unreachable or misconfigured.
    #[error("Backend not configured: {0}")]
    Configuration(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already used: {0}")]
    AlreadyUsed(String),
    /// The backend kept throttling us until the retry ceiling was reached.
    #[error("Backend rate limit persisted after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },
    /// A write may or may not have landed.
    #[error("Write outcome unknown: {0}")]
    TransientWrite(String),
    /// Generic store failure for anything the backend rejected unexpectedly.
    #[error("Store failure: {0}")]
    Store(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Voting is currently paused")]
    ElectionPaused,
    /// A concurrent submission raced this one; flagged for reconciliation.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Every 4-digit voting ID has already been issued")]
    IdSpaceExhausted,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Configuration(_) | Self::RateLimited { .. } => Status::ServiceUnavailable,
            Self::NotFound(_) => Status::NotFound,
            Self::AlreadyUsed(_) | Self::Conflict(_) => Status::Conflict,
            Self::TransientWrite(_) => Status::BadGateway,
            Self::Store(_) | Self::IdSpaceExhausted => Status::InternalServerError,
            Self::BadRequest(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::ElectionPaused => Status::Forbidden,
        }
    }

    /// Reads cannot leave partial state behind, so a transient read failure
    /// is just a store failure.
    pub(crate) fn into_read_error(self) -> Self {
        match self {
            Self::TransientWrite(msg) => Self::Store(msg),
            other => other,
        }
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited(_) => Self::RateLimited { attempts: 1 },
            BackendError::Transient(msg) => Self::TransientWrite(msg),
            BackendError::Configuration(msg) => Self::Configuration(msg),
            BackendError::Rejected(msg) => Self::Store(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        if status.class() == StatusClass::ServerError {
            error!("{self}");
        } else {
            debug!("{self}");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).respond_to(req)
    }
}
