use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use summon_channel::Transport;
use summon_common::{
    Credentials, Endpoint, InferenceResult, InvocationError, ProgressEvent, ReleaseError,
    ServerError, ServiceIdentity,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::invoker::invoke;
use crate::provisioning::{Progress, Provisioner};
use crate::resolver::SessionResolver;
use crate::session::{ReleaseOutcome, SessionHandle};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Which session an invocation ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A session on an already running server.
    Direct,
    /// A session on a server launched for this request.
    Provisioned,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Direct => write!(f, "direct"),
            Phase::Provisioned => write!(f, "provisioned"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("open session failed: {0}")]
    OpenSession(ServerError),
    #[error("server launch failed: {0}")]
    Launch(ServerError),
    #[error("inference on {phase} session failed: {source}")]
    Invocation {
        phase: Phase,
        #[source]
        source: InvocationError,
    },
}

impl RecoveryError {
    /// `Provisioned` once a launch was requested, `Direct` before.
    pub fn phase(&self) -> Phase {
        match self {
            RecoveryError::OpenSession(_) => Phase::Direct,
            RecoveryError::Launch(_) => Phase::Provisioned,
            RecoveryError::Invocation { phase, .. } => *phase,
        }
    }
}

/// What happened to the sessions bound during one run.
#[derive(Debug, Default)]
pub struct Cleanup {
    released: usize,
    failures: Vec<ReleaseError>,
}

impl Cleanup {
    /// No session was ever bound, so there was nothing to release.
    pub fn nothing_bound(&self) -> bool {
        self.bound() == 0
    }

    pub fn bound(&self) -> usize {
        self.released + self.failures.len()
    }

    pub fn released(&self) -> usize {
        self.released
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ReleaseError] {
        &self.failures
    }

    async fn release(&mut self, mut handle: SessionHandle) {
        match handle.release().await {
            Ok(ReleaseOutcome::Released) => self.released += 1,
            Ok(ReleaseOutcome::AlreadyReleased) => {}
            Err(err) => {
                tracing::error!(error=%err, "session release failed");
                self.failures.push(err);
            }
        }
    }
}

/// Primary outcome and cleanup of one run, reported side by side.
#[derive(Debug)]
pub struct Report {
    pub outcome: Result<InferenceResult, RecoveryError>,
    pub cleanup: Cleanup,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok() && self.cleanup.is_clean()
    }
}

type ProgressObserver<'a> = dyn FnMut(&ProgressEvent) + Send + 'a;

/// Runs one inference, launching a server first if none is running.
///
/// At most one launch and at most two invocation attempts per run. Every
/// session bound during the run is released exactly once before `run`
/// returns, whatever the outcome.
pub struct RecoveryController {
    resolver: SessionResolver,
    provisioner: Provisioner,
    endpoint: Endpoint,
    credentials: Credentials,
    launch_deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl RecoveryController {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            resolver: SessionResolver::new(transport.clone()),
            provisioner: Provisioner::new(transport, DEFAULT_POLL_INTERVAL),
            endpoint,
            credentials,
            launch_deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.provisioner = self.provisioner.with_poll_interval(poll_interval);
        self
    }

    /// Give up waiting for a launch after `deadline`. Checked before every
    /// progress draw and while waiting between polls.
    pub fn with_launch_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.launch_deadline = deadline;
        self
    }

    /// Abort a launch wait when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn run<F>(&self, identity: &ServiceIdentity, input: &Path, mut on_progress: F) -> Report
    where
        F: FnMut(&ProgressEvent) + Send,
    {
        let mut cleanup = Cleanup::default();
        let outcome = self
            .drive(identity, input, &mut on_progress, &mut cleanup)
            .await;
        if let Err(err) = &outcome {
            tracing::warn!(error=%err, phase=%err.phase(), "request failed");
        }
        Report { outcome, cleanup }
    }

    async fn drive(
        &self,
        identity: &ServiceIdentity,
        input: &Path,
        on_progress: &mut ProgressObserver<'_>,
        cleanup: &mut Cleanup,
    ) -> Result<InferenceResult, RecoveryError> {
        tracing::info!(%identity, endpoint=%self.endpoint, "start");

        match self
            .resolver
            .resolve(&self.endpoint, identity, &self.credentials)
            .await
        {
            Ok(handle) => {
                let result = invoke(&handle, input).await;
                cleanup.release(handle).await;
                match result {
                    Ok(result) => return Ok(result),
                    Err(err) if err.is_no_server_available() => {
                        tracing::info!(error=%err, "server went away before inference, launching");
                    }
                    Err(source) => {
                        return Err(RecoveryError::Invocation {
                            phase: Phase::Direct,
                            source,
                        })
                    }
                }
            }
            Err(err) if err.is_no_server_available() => {
                tracing::info!(error=%err, "launch server & open session");
            }
            Err(err) => return Err(RecoveryError::OpenSession(err)),
        }

        let handle = self
            .await_launch(identity, on_progress, cleanup)
            .await
            .map_err(RecoveryError::Launch)?;
        let result = invoke(&handle, input).await;
        cleanup.release(handle).await;
        result.map_err(|source| RecoveryError::Invocation {
            phase: Phase::Provisioned,
            source,
        })
    }

    async fn await_launch(
        &self,
        identity: &ServiceIdentity,
        on_progress: &mut ProgressObserver<'_>,
        cleanup: &mut Cleanup,
    ) -> Result<SessionHandle, ServerError> {
        let deadline = self.launch_deadline.map(|d| Instant::now() + d);
        let mut monitor = self
            .provisioner
            .request_provision(&self.endpoint, identity, &self.credentials)
            .await?
            .abort_on(self.cancel.clone(), deadline);

        loop {
            match monitor.next_progress().await {
                Ok(Progress::Event(event)) => {
                    tracing::debug!(
                        launch_id=%monitor.launch_id(),
                        current_count=event.current_count,
                        scheduled_count=event.scheduled_count,
                        "launch progress"
                    );
                    on_progress(&event);
                }
                Ok(Progress::Ready(handle)) => return Ok(handle),
                Err(err) => {
                    if let Some(handle) = monitor.take_bound() {
                        cleanup.release(handle).await;
                    }
                    return Err(err);
                }
            }
        }
    }
}
