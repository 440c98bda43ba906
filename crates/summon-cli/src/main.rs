mod args;
mod config;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use summon_channel::HttpsTransport;
use summon_client::RecoveryController;
use summon_common::{telemetry, ServiceIdentity};
use tokio_util::sync::CancellationToken;

use crate::args::{parse_identity, ArgumentError};
use crate::config::ClientConfig;
use crate::output::{emit_status, print_records, status_for, StatusToken};

const SERVICE_NAME: &str = "summon";

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();

    // Checked before any configuration is read or connection made.
    let identity = match admit(&argv) {
        Ok(identity) => identity,
        Err(rejected) => {
            let _ = telemetry::init_tracing(SERVICE_NAME, None, None, "text");
            tracing::error!(error=%rejected.error, "invalid arguments");
            if let Err(e) = emit_status(rejected.token) {
                eprintln!("failed to write status: {e}");
            }
            return rejected.code;
        }
    };

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let _ = telemetry::init_tracing(SERVICE_NAME, None, None, "text");
            tracing::error!(error=%e, "invalid configuration");
            return finish(Err(StatusToken::from(&e)));
        }
    };
    let otel = telemetry::init_tracing(
        SERVICE_NAME,
        config.otlp_url.as_deref(),
        config.otlp_token.as_deref(),
        config.log_format.as_str(),
    );

    let code = finish(run(identity, &config).await);

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    code
}

/// Exit status for a run's result. A failed run writes its token first.
fn finish(result: Result<(), StatusToken>) -> ExitCode {
    if let Err(token) = result {
        if let Err(e) = emit_status(token) {
            eprintln!("failed to write status: {e}");
        }
    }
    exit_code(&result)
}

fn exit_code(result: &Result<(), StatusToken>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Arguments that cannot start a run, with the token and exit status the
/// process ends with.
#[derive(Debug)]
struct Rejected {
    error: ArgumentError,
    token: StatusToken,
    code: ExitCode,
}

fn admit(argv: &[String]) -> Result<ServiceIdentity, Rejected> {
    parse_identity(argv).map_err(|error| {
        let token = StatusToken::from(&error);
        Rejected {
            error,
            token,
            code: exit_code(&Err(token)),
        }
    })
}

async fn run(identity: ServiceIdentity, config: &ClientConfig) -> Result<(), StatusToken> {
    let credentials = config.load_credentials().map_err(|e| {
        tracing::error!(error=%e, "failed to load credentials");
        StatusToken::from(&e)
    })?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, abandoning launch wait");
                cancel.cancel();
            }
        }
    });

    let transport = Arc::new(HttpsTransport::new(
        config.connect_timeout,
        config.request_timeout,
    ));
    let controller = RecoveryController::new(transport, config.endpoint.clone(), credentials)
        .with_poll_interval(config.poll_interval)
        .with_launch_deadline(config.launch_deadline)
        .with_cancellation(cancel);

    let report = controller
        .run(&identity, &config.input, |event| {
            tracing::info!(
                current_count = event.current_count,
                scheduled_count = event.scheduled_count,
                "now connecting"
            );
        })
        .await;
    interrupt.abort();

    if let Ok(result) = &report.outcome {
        if result.is_absent() {
            tracing::info!("inference results is None");
        }
        if let Err(e) = print_records(result) {
            tracing::error!(error=%e, "failed to write results");
        }
    }

    match status_for(&report) {
        Some(token) => Err(token),
        None => {
            tracing::info!(%identity, "finish");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rejected(items: &[&str]) -> Rejected {
        match admit(&argv(items)) {
            Ok(identity) => panic!("{items:?} admitted as {identity}"),
            Err(rejected) => rejected,
        }
    }

    #[test]
    fn test_wrong_argument_count_exits_with_arg_token() {
        let cases: [&[&str]; 4] = [
            &["summon"],
            &["summon", "detect"],
            &["summon", "detect", "v1", "extra"],
            &["summon", "detect", "v1", "extra", "more"],
        ];
        for items in cases {
            let r = rejected(items);
            assert!(matches!(r.error, ArgumentError::Count(_)), "{items:?}");
            assert_eq!(r.token, StatusToken::ArgNum);
            assert_eq!(r.code, ExitCode::FAILURE);
        }
    }

    #[test]
    fn test_empty_identity_exits_with_arg_token() {
        let r = rejected(&["summon", "", "v1"]);
        assert_eq!(r.token, StatusToken::ArgNum);
        assert_eq!(r.code, ExitCode::FAILURE);
    }

    #[test]
    fn test_two_arguments_start_a_run() {
        let identity = admit(&argv(&["summon", "detect", "-v1"])).unwrap();
        assert_eq!(identity.to_string(), "detect/-v1");
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&Ok(())), ExitCode::SUCCESS);
        assert_eq!(
            exit_code(&Err(StatusToken::LaunchServer)),
            ExitCode::FAILURE
        );
    }
}
