use thiserror::Error;
use tonic::Code;
use uuid::Uuid;

use crate::job::JobStatus;
use crate::tls::TlsError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Call to resource did not have the proper authentication token")]
    Authentication,

    #[error("User is not allowed to perform this action")]
    Forbidden,

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Tool not found: {0}")]
    ToolNotFound(Uuid),

    #[error("Resource not found: {0}")]
    ResourceNotFound(Uuid),

    #[error("Job {job_id} already finished ({status})")]
    AlreadyFinished { job_id: Uuid, status: JobStatus },

    #[error("Cannot {action} job {job_id} while it is {status}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stack position {position}: {reason}")]
    StackReorder { position: usize, reason: String },

    #[error("Resource already registered at {0}")]
    DuplicateResource(String),

    #[error("Resource unavailable: {0}")]
    Unavailable(String),

    #[error("Resource error: {0}")]
    Remote(String),

    #[error("Hook {target} failed: {reason}")]
    Hook { target: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transport-level failures degrade the resource instead of failing the job.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Transport(_))
    }

    /// Whether this error is the finished-job rejection of the task state machine.
    pub fn is_already_finished(&self) -> bool {
        matches!(self, Error::AlreadyFinished { .. })
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Authentication => tonic::Status::unauthenticated(message),
            Error::Forbidden => tonic::Status::permission_denied(message),
            Error::JobNotFound(id) => {
                tonic::Status::with_details(Code::NotFound, message, id.to_string().into())
            }
            Error::ToolNotFound(_) | Error::ResourceNotFound(_) => {
                tonic::Status::new(Code::NotFound, message)
            }
            Error::AlreadyFinished { .. } | Error::InvalidTransition { .. } => {
                tonic::Status::failed_precondition(message)
            }
            Error::InvalidParameter(_) | Error::StackReorder { .. } => {
                tonic::Status::invalid_argument(message)
            }
            Error::DuplicateResource(_) => tonic::Status::already_exists(message),
            Error::Unavailable(_) | Error::Transport(_) => tonic::Status::unavailable(message),
            _ => tonic::Status::internal(message),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unauthenticated => Error::Authentication,
            Code::PermissionDenied => Error::Forbidden,
            // Job lookups carry the id in the details so they stay
            // distinguishable from tool lookups.
            Code::NotFound => match std::str::from_utf8(status.details())
                .ok()
                .and_then(|d| Uuid::parse_str(d).ok())
            {
                Some(id) => Error::JobNotFound(id),
                None => Error::Remote(message),
            },
            Code::InvalidArgument => Error::InvalidParameter(message),
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
                Error::Unavailable(message)
            }
            _ => Error::Remote(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_survives_the_wire() {
        let status: tonic::Status = Error::Authentication.into();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert!(matches!(Error::from(status), Error::Authentication));
    }

    #[test]
    fn job_not_found_is_distinct_from_tool_not_found() {
        let id = Uuid::new_v4();
        let job: Error = tonic::Status::from(Error::JobNotFound(id)).into();
        assert!(matches!(job, Error::JobNotFound(got) if got == id));

        let tool: Error = tonic::Status::from(Error::ToolNotFound(id)).into();
        assert!(matches!(tool, Error::Remote(msg) if msg.starts_with("Tool not found")));
    }

    #[test]
    fn unavailable_classification() {
        assert!(Error::Unavailable("down".into()).is_unavailable());
        assert!(Error::from(tonic::Status::unavailable("gone")).is_unavailable());
        assert!(!Error::Authentication.is_unavailable());
        assert!(!Error::Remote("boom".into()).is_unavailable());
    }
}
