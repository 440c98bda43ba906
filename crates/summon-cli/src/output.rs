use std::io::Write;

use summon_client::{Phase, Report};
use summon_common::InferenceResult;

use crate::args::ArgumentError;
use crate::config::ConfigError;

/// The single token a failed run writes to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusToken {
    ArgNum,
    OpenSession,
    LaunchServer,
    CloseSession,
}

impl StatusToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusToken::ArgNum => "NG_arg_num_err",
            StatusToken::OpenSession => "NG_open_session",
            StatusToken::LaunchServer => "NG_launch_server",
            StatusToken::CloseSession => "NG_close_session",
        }
    }
}

impl std::fmt::Display for StatusToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ArgumentError> for StatusToken {
    fn from(_: &ArgumentError) -> Self {
        StatusToken::ArgNum
    }
}

/// Without a trust anchor or credentials no channel can be opened.
impl From<&ConfigError> for StatusToken {
    fn from(_: &ConfigError) -> Self {
        StatusToken::OpenSession
    }
}

/// `None` when the inference succeeded and every session was released.
///
/// A primary failure wins over a release failure.
pub fn status_for(report: &Report) -> Option<StatusToken> {
    match &report.outcome {
        Err(err) => Some(match err.phase() {
            Phase::Direct => StatusToken::OpenSession,
            Phase::Provisioned => StatusToken::LaunchServer,
        }),
        Ok(_) if !report.cleanup.is_clean() => Some(StatusToken::CloseSession),
        Ok(_) => None,
    }
}

pub fn emit_status(token: StatusToken) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    write!(out, "{token}")?;
    out.flush()?;
    Ok(())
}

/// One compact JSON line per record. An absent result prints nothing.
pub fn print_records(result: &InferenceResult) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    for record in result.records() {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use summon_channel::{LaunchFailure, SimulatedCloud};
    use summon_client::RecoveryController;
    use summon_common::{Credentials, Endpoint, ServerError, ServiceIdentity};

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("detect", "v1").unwrap()
    }

    fn input_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "summon-output-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, b"\xff\xd8jpeg").unwrap();
        path
    }

    async fn report(cloud: &SimulatedCloud, input: &Path) -> Report {
        let creds = Credentials::from_json("{}", Vec::new()).unwrap();
        RecoveryController::new(
            Arc::new(cloud.clone()),
            Endpoint::new("localhost", 52001),
            creds,
        )
        .with_poll_interval(Duration::ZERO)
        .run(&identity(), input, |_| {})
        .await
    }

    #[test]
    fn test_token_strings() {
        assert_eq!(StatusToken::ArgNum.as_str(), "NG_arg_num_err");
        assert_eq!(StatusToken::OpenSession.as_str(), "NG_open_session");
        assert_eq!(StatusToken::LaunchServer.to_string(), "NG_launch_server");
        assert_eq!(StatusToken::CloseSession.to_string(), "NG_close_session");
    }

    #[tokio::test]
    async fn test_success_has_no_token() {
        let cloud = SimulatedCloud::new();
        cloud.set_running(&identity(), 1).await;
        let input = input_file("ok");

        assert_eq!(status_for(&report(&cloud, &input).await), None);
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_cold_start_success_has_no_token() {
        let cloud = SimulatedCloud::new();
        cloud.set_scheduled_count(2).await;
        let input = input_file("cold");

        assert_eq!(status_for(&report(&cloud, &input).await), None);
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_open_session_token() {
        let cloud = SimulatedCloud::new();
        cloud.fail_connect("certificate rejected").await;
        let input = input_file("open");

        assert_eq!(
            status_for(&report(&cloud, &input).await),
            Some(StatusToken::OpenSession)
        );
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_launch_server_token() {
        let cloud = SimulatedCloud::new();
        cloud
            .fail_launch(LaunchFailure::Rejected("no capacity".into()))
            .await;
        let input = input_file("launch");

        assert_eq!(
            status_for(&report(&cloud, &input).await),
            Some(StatusToken::LaunchServer)
        );
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_close_session_token() {
        let cloud = SimulatedCloud::new();
        cloud.set_running(&identity(), 1).await;
        cloud.fail_close("channel torn down").await;
        let input = input_file("close");

        assert_eq!(
            status_for(&report(&cloud, &input).await),
            Some(StatusToken::CloseSession)
        );
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_primary_failure_wins_over_release_failure() {
        let cloud = SimulatedCloud::new();
        cloud.set_running(&identity(), 1).await;
        cloud.fail_close("channel torn down").await;
        cloud.push_inference_error(ServerError::other("model crashed")).await;
        let input = input_file("both");

        let report = report(&cloud, &input).await;
        assert!(!report.cleanup.is_clean());
        assert_eq!(status_for(&report), Some(StatusToken::OpenSession));
        let _ = std::fs::remove_file(input);
    }
}
