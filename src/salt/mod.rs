//! salt-api (netapi) client core.
//!
//! auth::authenticate     -> ServerToken (ordered failover over servers)
//! request::build_request -> ExecutionRequest for an ExecutionMode
//! dispatch::dispatch     -> DispatchResponse (blocking waits bounded by the minion timeout)
//! result::validate       -> ExecutionOutcome (every minion must return 0)
//! orchestrator           -> background run with a single completion + cancellation
//!
pub mod args;
pub mod auth;
pub mod dispatch;
pub mod error;
pub mod mode;
pub mod orchestrator;
pub mod request;
pub mod result;

use std::time::Duration;

use url::Url;

pub use args::{ParsedArguments, parse_arguments};
pub use auth::{CredentialProvider, Credentials, ServerToken, authenticate, parse_server_list};
pub use dispatch::{DispatchOptions, DispatchResponse, dispatch};
pub use error::{Result, SaltError};
pub use mode::{ExecutionMode, Target, TargetType};
pub use orchestrator::{
    CancelSignal, Orchestrator, RunConfig, RunError, RunHandle, RunReport, RunState, StepHost,
};
pub use request::{Endpoint, ExecutionRequest, build_request};
pub use result::{ExecutionOutcome, MinionResult, validate};

/// Join a path onto a salt-api base URL, keeping any base path prefix.
pub fn endpoint_url(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// HTTP client shared by every call of a run.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("salt-step/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SaltError::config(format!("cannot build HTTP client: {e}")))
}
