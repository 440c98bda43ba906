use std::path::Path;

use summon_common::{InferenceResult, InvocationError};

use crate::session::SessionHandle;

/// Run one inference on `input_path` over a bound session.
///
/// Exactly one remote call; no retry. The input is only read, not validated.
pub async fn invoke(
    session: &SessionHandle,
    input_path: &Path,
) -> Result<InferenceResult, InvocationError> {
    if session.is_released() {
        return Err(InvocationError::SessionReleased(
            session.session_id().to_string(),
        ));
    }

    let input = tokio::fs::read(input_path)
        .await
        .map_err(|source| InvocationError::Input {
            path: input_path.to_path_buf(),
            source,
        })?;

    let records = session.channel().infer(session.info(), input).await?;
    let result = InferenceResult::from_wire(records);
    match &result {
        InferenceResult::Absent => {
            tracing::debug!(session_id=%session.session_id(), "inference results is None")
        }
        InferenceResult::Records(records) => {
            tracing::debug!(session_id=%session.session_id(), count=records.len(), "inference done")
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SessionResolver;
    use std::sync::Arc;
    use summon_channel::SimulatedCloud;
    use summon_common::{Credentials, Endpoint, ServerError, ServiceIdentity};

    async fn bound(cloud: &SimulatedCloud) -> SessionHandle {
        let identity = ServiceIdentity::new("detect", "v1").unwrap();
        cloud.set_running(&identity, 1).await;
        let creds = Credentials::from_json("{}", Vec::new()).unwrap();
        SessionResolver::new(Arc::new(cloud.clone()))
            .resolve(&Endpoint::new("localhost", 52001), &identity, &creds)
            .await
            .unwrap()
    }

    fn input_file(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "summon-invoker-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, b"\xff\xd8jpeg").unwrap();
        path
    }

    #[tokio::test]
    async fn test_records_and_absent() {
        let cloud = SimulatedCloud::new();
        let mut handle = bound(&cloud).await;
        let input = input_file("records");

        cloud
            .set_inference_results(Some(vec![serde_json::json!({"label": "dog"})]))
            .await;
        let result = invoke(&handle, &input).await.unwrap();
        assert_eq!(result.records().len(), 1);

        cloud.set_inference_results(None).await;
        assert!(invoke(&handle, &input).await.unwrap().is_absent());
        assert_eq!(cloud.counts().await.infers, 2);

        handle.release().await.unwrap();
        let _ = std::fs::remove_file(input);
    }

    #[tokio::test]
    async fn test_missing_input_is_not_remote_error() {
        let cloud = SimulatedCloud::new();
        let mut handle = bound(&cloud).await;

        let err = invoke(&handle, Path::new("/nonexistent/summon/input.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::Input { .. }));
        assert_eq!(cloud.counts().await.infers, 0);

        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_and_released_session() {
        let cloud = SimulatedCloud::new();
        let mut handle = bound(&cloud).await;
        let input = input_file("remote");

        cloud.push_inference_error(ServerError::other("model crashed")).await;
        let err = invoke(&handle, &input).await.unwrap_err();
        assert!(matches!(err, InvocationError::Remote(_)));

        handle.release().await.unwrap();
        let err = invoke(&handle, &input).await.unwrap_err();
        assert!(matches!(err, InvocationError::SessionReleased(_)));
        assert_eq!(cloud.counts().await.infers, 1);
        let _ = std::fs::remove_file(input);
    }
}
