//! Authorization-gated access to the run service.
//!
//! [`ActionHandler`] resolves a permission decision for every request before
//! it is forwarded, translates run service failures into [`ActionError`], and
//! maps coarse run and task actions onto the run service's call shapes.

#![forbid(unsafe_code)]

pub mod authz;
pub mod error;
pub mod handler;
pub mod service;

pub use authz::{AuthorizerError, Caller, RunAuthorizer};
pub use error::{ActionError, ActionErrorKind, RemoteErrorKind, error_from_remote};
pub use handler::{
    ActionHandler, GetLogsRequest, GetRunsRequest, RunActionRequest, RunActionType,
    RunTaskActionRequest, RunTaskActionType,
};
pub use service::RunService;
