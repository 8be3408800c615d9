//! One pipeline step run: authenticate -> build -> dispatch -> validate.
//!
//! The run executes on its own tokio task. The caller gets a [`RunHandle`]
//! that delivers exactly one result and can request cooperative
//! cancellation, which is honored at every state boundary and while a
//! network call is pending.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::auth::{CredentialProvider, authenticate};
use super::dispatch::{DispatchOptions, dispatch};
use super::error::SaltError;
use super::mode::ExecutionMode;
use super::request::{ExecutionRequest, build_request};
use super::result::{ExecutionOutcome, MinionResult, validate};

/// File written into the workspace when output saving is enabled.
pub const OUTPUT_FILE: &str = "saltOutput.json";
/// Variable exported for downstream steps when enabled.
pub const OUTPUT_VARIABLE: &str = "SALTBUILDOUTPUT";
pub const DEFAULT_AUTH_BACKEND: &str = "pam";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Authenticating,
    Building,
    Dispatching,
    Validating,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Authenticating => "authenticating",
            RunState::Building => "building",
            RunState::Dispatching => "dispatching",
            RunState::Validating => "validating",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    /// The only non-failure successor of each state.
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Authenticating),
            RunState::Authenticating => Some(RunState::Building),
            RunState::Building => Some(RunState::Dispatching),
            RunState::Dispatching => Some(RunState::Validating),
            RunState::Validating => Some(RunState::Succeeded),
            RunState::Succeeded | RunState::Failed => None,
        }
    }

    pub fn can_transition(from: &RunState, to: &RunState) -> bool {
        if from.is_terminal() {
            return false;
        }
        *to == RunState::Failed || from.next().as_ref() == Some(to)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborator supplied by the pipeline: log sink, workspace and
/// variable export.
pub trait StepHost: Send + Sync {
    fn log(&self, line: &str);

    fn workspace(&self) -> Option<&Path>;

    fn export_variable(&self, key: &str, value: &str) -> Result<(), SaltError>;
}

/// Everything one run needs besides credentials.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub servers: Vec<Url>,
    pub auth_backend: String,
    pub mode: ExecutionMode,
    pub function: String,
    pub arguments: String,
    pub dispatch: DispatchOptions,
    pub save_file: bool,
    pub save_env: bool,
}

impl RunConfig {
    pub fn new(servers: Vec<Url>, mode: ExecutionMode, function: impl Into<String>) -> Self {
        Self {
            servers,
            auth_backend: DEFAULT_AUTH_BACKEND.to_string(),
            mode,
            function: function.into(),
            arguments: String::new(),
            dispatch: DispatchOptions::default(),
            save_file: false,
            save_env: false,
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub server_url: Url,
    pub request: ExecutionRequest,
    pub outcome: ExecutionOutcome,
    pub saved_file: Option<PathBuf>,
    pub elapsed: Duration,
}

/// A failed run: the error plus the state it happened in.
#[derive(Debug, Error)]
#[error("run failed while {state}: {source}")]
pub struct RunError {
    pub state: RunState,
    #[source]
    pub source: SaltError,
}

impl RunError {
    /// Results gathered before a timeout, if any.
    pub fn partial(&self) -> &[MinionResult] {
        match &self.source {
            SaltError::Timeout { partial, .. } => partial,
            _ => &[],
        }
    }
}

/// Cloneable cancel trigger for a running step.
#[derive(Clone)]
pub struct CancelSignal(Arc<watch::Sender<bool>>);

impl CancelSignal {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

pub struct RunHandle {
    cancel: CancelSignal,
    progress: watch::Receiver<RunState>,
    done: oneshot::Receiver<Result<RunReport, RunError>>,
    task: JoinHandle<()>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Last state the run reached.
    pub fn state(&self) -> RunState {
        *self.progress.borrow()
    }

    /// Wait for the single completion message.
    ///
    /// A task that dies without reporting yields `SaltError::Aborted`
    /// tagged with the last state it reached.
    pub async fn wait(self) -> Result<RunReport, RunError> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => {
                let state = *self.progress.borrow();
                let reason = match self.task.await {
                    Err(e) if e.is_panic() => {
                        format!("run task panicked: {}", panic_message(e.into_panic()))
                    }
                    Err(e) => e.to_string(),
                    Ok(()) => "run task ended without a result".to_string(),
                };
                error!("{} (while {})", reason, state);
                Err(RunError {
                    state,
                    source: SaltError::Aborted(reason),
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    http: Client,
}

impl Orchestrator {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Spawn a run on the current tokio runtime.
    pub fn start(
        &self,
        config: RunConfig,
        credentials: Arc<dyn CredentialProvider>,
        host: Arc<dyn StepHost>,
    ) -> RunHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(RunState::Idle);
        let (done_tx, done_rx) = oneshot::channel();
        let http = self.http.clone();

        let task = tokio::spawn(async move {
            let run = Run {
                state: RunState::Idle,
                progress: progress_tx,
                host,
                cancel: cancel_rx,
                started: Instant::now(),
            };
            let result = run.execute(&http, config, credentials).await;
            if done_tx.send(result).is_err() {
                debug!("Run finished after its handle was dropped");
            }
        });

        RunHandle {
            cancel: CancelSignal(Arc::new(cancel_tx)),
            progress: progress_rx,
            done: done_rx,
            task,
        }
    }

    /// Start a run and wait for it.
    pub async fn run(
        &self,
        config: RunConfig,
        credentials: Arc<dyn CredentialProvider>,
        host: Arc<dyn StepHost>,
    ) -> Result<RunReport, RunError> {
        self.start(config, credentials, host).wait().await
    }
}

struct Run {
    state: RunState,
    progress: watch::Sender<RunState>,
    host: Arc<dyn StepHost>,
    cancel: watch::Receiver<bool>,
    started: Instant,
}

impl Run {
    async fn execute(
        mut self,
        http: &Client,
        config: RunConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<RunReport, RunError> {
        self.advance(RunState::Authenticating)?;
        self.host.log(&format!(
            "Authenticating against {} server(s) with eauth '{}'",
            config.servers.len(),
            config.auth_backend
        ));
        let token = {
            let creds = credentials.credentials().map_err(|e| self.fail(e))?;
            self.guarded(authenticate(http, &config.servers, &creds, &config.auth_backend))
                .await?
        };
        self.host
            .log(&format!("Discovered netapi: {}", token.server_url));

        self.advance(RunState::Building)?;
        let request = build_request(&config.mode, &config.function, &config.arguments)
            .map_err(|e| self.fail(e))?;
        self.host
            .log(&format!("Sending JSON: {}", request.to_json()));

        self.advance(RunState::Dispatching)?;
        let response = self
            .guarded(dispatch(http, &token, &request, &config.dispatch))
            .await?;
        self.host.log(&format!("Response: {}", response.raw));

        self.advance(RunState::Validating)?;
        let outcome = validate(response.results, response.raw)
            .into_result()
            .map_err(|e| self.fail(e))?;
        let saved_file = self.persist(&config, &outcome).await?;

        self.advance(RunState::Succeeded)?;
        Ok(RunReport {
            server_url: token.server_url,
            request,
            outcome,
            saved_file,
            elapsed: self.started.elapsed(),
        })
    }

    fn advance(&mut self, next: RunState) -> Result<(), RunError> {
        let cancelled = *self.cancel.borrow();
        if cancelled {
            return Err(self.fail(SaltError::Cancelled));
        }
        debug_assert!(RunState::can_transition(&self.state, &next));
        info!("Run state {} -> {}", self.state, next);
        self.host
            .log(&format!("Run state: {} -> {}", self.state, next));
        self.state = next;
        self.progress.send_replace(next);
        Ok(())
    }

    /// Record the failure, move to `Failed`, and report the error.
    fn fail(&mut self, source: SaltError) -> RunError {
        let at = self.state;
        self.state = RunState::Failed;
        self.progress.send_replace(RunState::Failed);
        let err = RunError { state: at, source };
        for r in err.partial() {
            self.host.log(&format!(
                "Partial result: {} (retcode {}): {}",
                r.minion_id, r.retcode, r.return_value
            ));
        }
        warn!("{}", err);
        self.host.log(&format!("ERROR: {err}"));
        err
    }

    /// Await `fut` unless cancellation arrives first.
    async fn guarded<T, F>(&mut self, fut: F) -> Result<T, RunError>
    where
        F: Future<Output = Result<T, SaltError>>,
    {
        let mut cancel = self.cancel.clone();
        let res = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(SaltError::Cancelled),
            res = fut => res,
        };
        res.map_err(|e| self.fail(e))
    }

    async fn persist(
        &mut self,
        config: &RunConfig,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<PathBuf>, RunError> {
        let raw = outcome.raw.to_string();
        let mut saved = None;
        if config.save_file {
            let Some(dir) = self.host.workspace().map(Path::to_path_buf) else {
                return Err(self.fail(SaltError::config(
                    "saving output requires a workspace directory",
                )));
            };
            let path = dir.join(OUTPUT_FILE);
            if let Err(e) = tokio::fs::write(&path, raw.as_bytes()).await {
                return Err(self.fail(e.into()));
            }
            self.host
                .log(&format!("Wrote output to {}", path.display()));
            saved = Some(path);
        }
        if config.save_env
            && let Err(e) = self.host.export_variable(OUTPUT_VARIABLE, &raw)
        {
            return Err(self.fail(e));
        }
        Ok(saved)
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        // Handle dropped without cancelling; never fire.
        std::future::pending::<()>().await;
    }
}
