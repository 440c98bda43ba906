use summon_channel::{SessionInfo, SharedChannel};
use summon_common::{ReleaseError, ServiceIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The handle was released before; no teardown was attempted.
    AlreadyReleased,
}

/// One bound session. Owns the channel it was opened on.
///
/// Not `Clone`: exactly one owner is responsible for calling [`release`].
///
/// [`release`]: SessionHandle::release
pub struct SessionHandle {
    channel: SharedChannel,
    identity: ServiceIdentity,
    session: SessionInfo,
    released: bool,
}

impl SessionHandle {
    pub(crate) fn new(
        channel: SharedChannel,
        identity: ServiceIdentity,
        session: SessionInfo,
    ) -> Self {
        Self {
            channel,
            identity,
            session,
            released: false,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn instance(&self) -> &str {
        &self.session.instance
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    pub(crate) fn info(&self) -> &SessionInfo {
        &self.session
    }

    /// Close the remote session.
    ///
    /// Teardown is attempted at most once: after the first call, successful
    /// or not, later calls return `AlreadyReleased` without touching the
    /// channel.
    pub async fn release(&mut self) -> Result<ReleaseOutcome, ReleaseError> {
        if self.released {
            tracing::debug!(session_id=%self.session.session_id, "session already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        self.released = true;

        match self.channel.close_session(&self.session).await {
            Ok(()) => {
                tracing::info!(session_id=%self.session.session_id, "close_session");
                Ok(ReleaseOutcome::Released)
            }
            Err(source) => Err(ReleaseError {
                session_id: self.session.session_id.clone(),
                source,
            }),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                session_id=%self.session.session_id,
                identity=%self.identity,
                "session handle dropped without release"
            );
        }
    }
}
