use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use summon_common::{Credentials, Endpoint, ResultRecord, ServerError, ServiceIdentity};
use tokio::sync::Mutex;

use crate::types::{
    Channel, LaunchState, LaunchStatus, LaunchTicket, SessionInfo, SharedChannel, Transport,
};

/// How many times each remote operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connects: usize,
    pub open_sessions: usize,
    pub launches: usize,
    pub status_polls: usize,
    pub infers: usize,
    pub closes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    /// The launch request itself is refused.
    Rejected(String),
    /// The launch reports failure on the given status poll (1-based).
    OnPoll { poll: usize, message: String },
}

/// In-process stand-in for the remote launch and serving service.
///
/// Cheap to clone; clones share state. Launch progress is scripted: each
/// status poll reports the next `current_count` from the script, and the poll
/// after the script runs out reports the launch as ready. The default script
/// for `n` scheduled instances is `0, 1, .., n-1`.
#[derive(Debug, Clone)]
pub struct SimulatedCloud {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    running: HashMap<ServiceIdentity, u32>,
    scheduled_count: u32,
    progress_script: Option<Vec<u32>>,
    launch_failure: Option<LaunchFailure>,
    connect_failure: Option<String>,
    open_failure: Option<String>,
    close_failure: Option<String>,
    queued_inference: VecDeque<Result<Option<Vec<ResultRecord>>, ServerError>>,
    default_inference: Option<Vec<ResultRecord>>,
    // session_id -> still open
    sessions: HashMap<String, bool>,
    launches: HashMap<String, Launch>,
    counts: CallCounts,
}

#[derive(Debug)]
struct Launch {
    identity: ServiceIdentity,
    scheduled_count: u32,
    polls: usize,
    session: Option<SessionInfo>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            running: HashMap::new(),
            scheduled_count: 1,
            progress_script: None,
            launch_failure: None,
            connect_failure: None,
            open_failure: None,
            close_failure: None,
            queued_inference: VecDeque::new(),
            default_inference: Some(Vec::new()),
            sessions: HashMap::new(),
            launches: HashMap::new(),
            counts: CallCounts::default(),
        }
    }
}

impl Inner {
    fn open(&mut self, identity: &ServiceIdentity) -> SessionInfo {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), true);
        SessionInfo {
            session_id,
            instance: format!("{identity}#0"),
        }
    }
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub async fn set_running(&self, identity: &ServiceIdentity, instances: u32) {
        self.inner
            .lock()
            .await
            .running
            .insert(identity.clone(), instances);
    }

    /// Instance count the next launch will schedule.
    pub async fn set_scheduled_count(&self, count: u32) {
        self.inner.lock().await.scheduled_count = count;
    }

    pub async fn set_progress_script(&self, script: Vec<u32>) {
        self.inner.lock().await.progress_script = Some(script);
    }

    pub async fn fail_launch(&self, failure: LaunchFailure) {
        self.inner.lock().await.launch_failure = Some(failure);
    }

    pub async fn fail_connect(&self, message: impl Into<String>) {
        self.inner.lock().await.connect_failure = Some(message.into());
    }

    pub async fn fail_open_session(&self, message: impl Into<String>) {
        self.inner.lock().await.open_failure = Some(message.into());
    }

    pub async fn fail_close(&self, message: impl Into<String>) {
        self.inner.lock().await.close_failure = Some(message.into());
    }

    /// Result returned by every inference call not covered by a queued outcome.
    pub async fn set_inference_results(&self, results: Option<Vec<ResultRecord>>) {
        self.inner.lock().await.default_inference = results;
    }

    /// Fail the next not-yet-consumed inference call with `err`.
    pub async fn push_inference_error(&self, err: ServerError) {
        self.inner.lock().await.queued_inference.push_back(Err(err));
    }

    /// Tear down every open session on the remote side, as an idle reaper would.
    pub async fn expire_sessions(&self) {
        let mut inner = self.inner.lock().await;
        for open in inner.sessions.values_mut() {
            *open = false;
        }
    }

    pub async fn counts(&self) -> CallCounts {
        self.inner.lock().await.counts
    }

    pub async fn open_session_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .filter(|open| **open)
            .count()
    }

    pub async fn running(&self, identity: &ServiceIdentity) -> u32 {
        self.inner
            .lock()
            .await
            .running
            .get(identity)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedCloud {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
        identity: &ServiceIdentity,
        _credentials: &Credentials,
    ) -> Result<SharedChannel, ServerError> {
        let mut inner = self.inner.lock().await;
        inner.counts.connects += 1;
        if let Some(msg) = inner.connect_failure.clone() {
            return Err(ServerError::open_session_failed(msg));
        }
        Ok(Arc::new(SimulatedChannel {
            cloud: self.clone(),
            identity: identity.clone(),
        }))
    }
}

struct SimulatedChannel {
    cloud: SimulatedCloud,
    identity: ServiceIdentity,
}

#[async_trait]
impl Channel for SimulatedChannel {
    async fn open_session(&self) -> Result<SessionInfo, ServerError> {
        let mut inner = self.cloud.inner.lock().await;
        inner.counts.open_sessions += 1;
        if let Some(msg) = inner.open_failure.clone() {
            return Err(ServerError::open_session_failed(msg));
        }
        let running = inner.running.get(&self.identity).copied().unwrap_or(0);
        if running == 0 {
            return Err(ServerError::no_server_available(format!(
                "no running instance for {}",
                self.identity
            )));
        }
        Ok(inner.open(&self.identity))
    }

    async fn launch(&self) -> Result<LaunchTicket, ServerError> {
        let mut inner = self.cloud.inner.lock().await;
        inner.counts.launches += 1;
        if let Some(LaunchFailure::Rejected(msg)) = inner.launch_failure.clone() {
            return Err(ServerError::launch_failed(msg));
        }
        let launch_id = uuid::Uuid::new_v4().to_string();
        let scheduled_count = inner.scheduled_count;
        inner.launches.insert(
            launch_id.clone(),
            Launch {
                identity: self.identity.clone(),
                scheduled_count,
                polls: 0,
                session: None,
            },
        );
        Ok(LaunchTicket {
            launch_id,
            scheduled_count,
        })
    }

    async fn launch_status(&self, ticket: &LaunchTicket) -> Result<LaunchStatus, ServerError> {
        let mut guard = self.cloud.inner.lock().await;
        let inner = &mut *guard;
        inner.counts.status_polls += 1;

        let Some(launch) = inner.launches.get_mut(&ticket.launch_id) else {
            return Err(ServerError::launch_failed(format!(
                "unknown launch {}",
                ticket.launch_id
            )));
        };
        launch.polls += 1;
        let scheduled = launch.scheduled_count;

        if let Some(LaunchFailure::OnPoll { poll, message }) = &inner.launch_failure {
            if launch.polls >= *poll {
                return Ok(LaunchStatus {
                    current_count: 0,
                    scheduled_count: scheduled,
                    state: LaunchState::Failed {
                        message: message.clone(),
                    },
                });
            }
        }

        let script = inner
            .progress_script
            .clone()
            .unwrap_or_else(|| (0..scheduled).collect());
        if let Some(current) = script.get(launch.polls - 1) {
            return Ok(LaunchStatus {
                current_count: *current,
                scheduled_count: scheduled,
                state: LaunchState::Pending,
            });
        }

        let session = match launch.session.clone() {
            Some(session) => session,
            None => {
                let identity = launch.identity.clone();
                let running = inner.running.entry(identity.clone()).or_insert(0);
                *running = running.saturating_add(scheduled);
                let session = inner.open(&identity);
                if let Some(launch) = inner.launches.get_mut(&ticket.launch_id) {
                    launch.session = Some(session.clone());
                }
                session
            }
        };

        Ok(LaunchStatus {
            current_count: scheduled,
            scheduled_count: scheduled,
            state: LaunchState::Ready { session },
        })
    }

    async fn infer(
        &self,
        session: &SessionInfo,
        _input: Vec<u8>,
    ) -> Result<Option<Vec<ResultRecord>>, ServerError> {
        let mut inner = self.cloud.inner.lock().await;
        inner.counts.infers += 1;
        if inner.sessions.get(&session.session_id) != Some(&true) {
            return Err(ServerError::other(format!(
                "session {} not found",
                session.session_id
            )));
        }
        match inner.queued_inference.pop_front() {
            Some(outcome) => outcome,
            None => Ok(inner.default_inference.clone()),
        }
    }

    async fn close_session(&self, session: &SessionInfo) -> Result<(), ServerError> {
        let mut inner = self.cloud.inner.lock().await;
        inner.counts.closes += 1;
        if let Some(msg) = inner.close_failure.clone() {
            return Err(ServerError::other(msg));
        }
        match inner.sessions.get_mut(&session.session_id) {
            Some(open) if *open => {
                *open = false;
                Ok(())
            }
            _ => Err(ServerError::other(format!(
                "session {} not found",
                session.session_id
            ))),
        }
    }
}
