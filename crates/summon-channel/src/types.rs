use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use summon_common::{Credentials, Endpoint, ResultRecord, ServerError, ServiceIdentity};

/// A session the remote side opened for us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Serving instance the session is bound to.
    pub instance: String,
}

/// Receipt for a launch request. `scheduled_count` is decided remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTicket {
    pub launch_id: String,
    pub scheduled_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Pending,
    /// Instances are up and a session has been opened on one of them.
    Ready { session: SessionInfo },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStatus {
    pub current_count: u32,
    pub scheduled_count: u32,
    pub state: LaunchState,
}

pub type SharedChannel = Arc<dyn Channel>;

/// Factory for secured channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish an authenticated channel to `endpoint`, scoped to `identity`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ServiceIdentity,
        credentials: &Credentials,
    ) -> Result<SharedChannel, ServerError>;
}

/// Remote operations available over one secured channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Fails with `NoServerAvailable` when nothing is running for the identity.
    async fn open_session(&self) -> Result<SessionInfo, ServerError>;

    async fn launch(&self) -> Result<LaunchTicket, ServerError>;

    async fn launch_status(&self, ticket: &LaunchTicket) -> Result<LaunchStatus, ServerError>;

    /// `Ok(None)` means the model produced nothing for this input.
    async fn infer(
        &self,
        session: &SessionInfo,
        input: Vec<u8>,
    ) -> Result<Option<Vec<ResultRecord>>, ServerError>;

    async fn close_session(&self, session: &SessionInfo) -> Result<(), ServerError>;
}
