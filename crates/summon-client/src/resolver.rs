use std::sync::Arc;

use summon_channel::Transport;
use summon_common::{Credentials, Endpoint, ServerError, ServiceIdentity};

use crate::session::SessionHandle;

/// Opens a session against servers that are already running.
#[derive(Clone)]
pub struct SessionResolver {
    transport: Arc<dyn Transport>,
}

impl SessionResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Connect and open one session. Not idempotent: every call may create a
    /// new remote session.
    ///
    /// `NoServerAvailable` is passed through untouched so the caller can decide
    /// to launch; any other failure is terminal for the attempt.
    pub async fn resolve(
        &self,
        endpoint: &Endpoint,
        identity: &ServiceIdentity,
        credentials: &Credentials,
    ) -> Result<SessionHandle, ServerError> {
        let channel = self.transport.connect(endpoint, identity, credentials).await?;
        let session = channel.open_session().await?;
        tracing::info!(
            %endpoint,
            %identity,
            session_id=%session.session_id,
            instance=%session.instance,
            "session opened"
        );
        Ok(SessionHandle::new(channel, identity.clone(), session))
    }
}
