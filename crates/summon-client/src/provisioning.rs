use std::sync::Arc;
use std::time::Duration;

use summon_channel::{LaunchState, LaunchTicket, SharedChannel, Transport};
use summon_common::{
    Credentials, Endpoint, ProgressEvent, ServerError, ServerErrorKind, ServiceIdentity,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::session::SessionHandle;

/// One draw from a [`ProvisioningMonitor`].
#[derive(Debug)]
pub enum Progress {
    /// Launch still in flight.
    Event(ProgressEvent),
    /// Terminal: a session is bound on a launched server.
    Ready(SessionHandle),
}

/// Requests server launches.
#[derive(Clone)]
pub struct Provisioner {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
}

impl Provisioner {
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        Self {
            transport,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Ask the remote side to launch servers for `identity`. Every failure on
    /// this path is reported as `LaunchFailed`.
    pub async fn request_provision(
        &self,
        endpoint: &Endpoint,
        identity: &ServiceIdentity,
        credentials: &Credentials,
    ) -> Result<ProvisioningMonitor, ServerError> {
        let channel = self
            .transport
            .connect(endpoint, identity, credentials)
            .await
            .map_err(as_launch_failure)?;
        let ticket = channel.launch().await.map_err(as_launch_failure)?;
        tracing::info!(
            %identity,
            launch_id=%ticket.launch_id,
            scheduled_count=ticket.scheduled_count,
            "server launch requested"
        );
        Ok(ProvisioningMonitor::new(
            channel,
            identity.clone(),
            ticket,
            self.poll_interval,
        ))
    }
}

fn as_launch_failure(err: ServerError) -> ServerError {
    err.into_kind(ServerErrorKind::LaunchFailed)
}

enum MonitorState {
    Polling,
    /// Failed before the first draw; reported by it.
    Rejected(ServerError),
    /// The final progress event was handed out; the next draw yields this.
    Bound(SessionHandle),
    /// The launch ended in failure while a remote session was open. Never
    /// drawn, only handed over by `take_bound`.
    Abandoned(SessionHandle),
    Finished,
}

/// Pull-based, non-restartable view of one server launch.
///
/// Draws yield progress events with non-decreasing `current_count` and the
/// `scheduled_count` fixed at launch, and end with either a bound session or
/// a `LaunchFailed` error. Draws after the end fail. An event is only yielded
/// when the observed count changes; between remote polls the monitor sleeps
/// for the poll interval.
///
/// The monitor has no timeout of its own. A caller may attach a cancellation
/// token and a deadline with [`abort_on`]; they are checked before each draw
/// and while sleeping, never while a remote poll is in flight, so a session
/// the remote side reports is always kept. If a draw fails with a session
/// open, [`take_bound`] hands it over for release.
///
/// [`abort_on`]: ProvisioningMonitor::abort_on
/// [`take_bound`]: ProvisioningMonitor::take_bound
pub struct ProvisioningMonitor {
    channel: SharedChannel,
    identity: ServiceIdentity,
    ticket: LaunchTicket,
    poll_interval: Duration,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    last: Option<ProgressEvent>,
    polls: u64,
    state: MonitorState,
}

impl ProvisioningMonitor {
    fn new(
        channel: SharedChannel,
        identity: ServiceIdentity,
        ticket: LaunchTicket,
        poll_interval: Duration,
    ) -> Self {
        let state = if ticket.scheduled_count == 0 {
            MonitorState::Rejected(ServerError::launch_failed(format!(
                "launch {} scheduled no instances",
                ticket.launch_id
            )))
        } else {
            MonitorState::Polling
        };
        Self {
            channel,
            identity,
            ticket,
            poll_interval,
            cancel: CancellationToken::new(),
            deadline: None,
            last: None,
            polls: 0,
            state,
        }
    }

    /// Fail draws once `cancel` fires or `deadline` passes.
    pub fn abort_on(mut self, cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        self.cancel = cancel;
        self.deadline = deadline;
        self
    }

    pub fn launch_id(&self) -> &str {
        &self.ticket.launch_id
    }

    pub fn scheduled_count(&self) -> u32 {
        self.ticket.scheduled_count
    }

    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.last
    }

    /// Hand over a session that is open but will not be drawn, if any. Lets
    /// a caller that abandons the monitor release it.
    pub fn take_bound(&mut self) -> Option<SessionHandle> {
        match std::mem::replace(&mut self.state, MonitorState::Finished) {
            MonitorState::Bound(handle) | MonitorState::Abandoned(handle) => Some(handle),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn aborted(&self) -> Option<ServerError> {
        if self.cancel.is_cancelled() {
            return Some(ServerError::launch_failed("launch wait cancelled"));
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(ServerError::launch_failed(
                "launch wait deadline exceeded",
            )),
            _ => None,
        }
    }

    /// Wait out the poll interval unless the wait is aborted first.
    async fn pause(&self) -> Result<(), ServerError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ServerError::launch_failed("launch wait cancelled"))
            }
            _ = deadline_elapsed(self.deadline) => {
                Err(ServerError::launch_failed("launch wait deadline exceeded"))
            }
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    pub async fn next_progress(&mut self) -> Result<Progress, ServerError> {
        if let Some(err) = self.aborted() {
            if let MonitorState::Bound(handle) =
                std::mem::replace(&mut self.state, MonitorState::Finished)
            {
                self.state = MonitorState::Abandoned(handle);
            }
            return Err(err);
        }

        match std::mem::replace(&mut self.state, MonitorState::Finished) {
            MonitorState::Polling => {}
            MonitorState::Rejected(err) => return Err(err),
            MonitorState::Bound(handle) => return Ok(Progress::Ready(handle)),
            MonitorState::Abandoned(handle) => {
                self.state = MonitorState::Abandoned(handle);
                return Err(self.exhausted());
            }
            MonitorState::Finished => return Err(self.exhausted()),
        }

        let scheduled = self.ticket.scheduled_count;
        loop {
            if self.polls > 0 && !self.poll_interval.is_zero() {
                self.pause().await?;
            }
            if let Some(err) = self.aborted() {
                return Err(err);
            }
            self.polls += 1;

            let status = self
                .channel
                .launch_status(&self.ticket)
                .await
                .map_err(as_launch_failure)?;

            if status.scheduled_count != scheduled {
                if let LaunchState::Ready { session } = status.state {
                    self.state = MonitorState::Abandoned(SessionHandle::new(
                        self.channel.clone(),
                        self.identity.clone(),
                        session,
                    ));
                }
                return Err(ServerError::launch_failed(format!(
                    "launch {} changed scheduled count from {} to {}",
                    self.ticket.launch_id, scheduled, status.scheduled_count
                )));
            }

            match status.state {
                LaunchState::Failed { message } => {
                    return Err(ServerError::launch_failed(message));
                }
                LaunchState::Ready { session } => {
                    tracing::info!(
                        launch_id=%self.ticket.launch_id,
                        session_id=%session.session_id,
                        instance=%session.instance,
                        "launched server ready, session opened"
                    );
                    let handle =
                        SessionHandle::new(self.channel.clone(), self.identity.clone(), session);
                    let done = ProgressEvent::new(scheduled, scheduled);
                    if self.last == Some(done) {
                        return Ok(Progress::Ready(handle));
                    }
                    self.last = Some(done);
                    self.state = MonitorState::Bound(handle);
                    return Ok(Progress::Event(done));
                }
                LaunchState::Pending => {
                    let mut current = status.current_count.min(scheduled);
                    if let Some(prev) = self.last {
                        if current < prev.current_count {
                            tracing::warn!(
                                launch_id=%self.ticket.launch_id,
                                reported=current,
                                previous=prev.current_count,
                                "launch progress went backwards, keeping previous count"
                            );
                            current = prev.current_count;
                        }
                    }
                    let event = ProgressEvent::new(current, scheduled);
                    if self.last != Some(event) {
                        self.last = Some(event);
                        self.state = MonitorState::Polling;
                        return Ok(Progress::Event(event));
                    }
                    tracing::trace!(launch_id=%self.ticket.launch_id, polls=self.polls, "no launch progress yet");
                }
            }
        }
    }

    fn exhausted(&self) -> ServerError {
        ServerError::launch_failed(format!(
            "launch {} already finished",
            self.ticket.launch_id
        ))
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for ProvisioningMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningMonitor")
            .field("identity", &self.identity)
            .field("ticket", &self.ticket)
            .field("last", &self.last)
            .field("polls", &self.polls)
            .finish()
    }
}
