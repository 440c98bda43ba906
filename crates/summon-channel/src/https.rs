use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use summon_common::{
    Credentials, Endpoint, ResultRecord, ServerError, ServerErrorKind, ServiceIdentity,
};

use crate::types::{
    Channel, LaunchState, LaunchStatus, LaunchTicket, SessionInfo, SharedChannel, Transport,
};

const AUTH_HEADER: &str = "x-auth-info";

/// Builds rustls-backed channels that trust only the caller's certificate.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpsTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for HttpsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(300))
    }
}

fn trust_anchor(bytes: &[u8]) -> reqwest::Result<Certificate> {
    if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
        Certificate::from_pem(bytes)
    } else {
        Certificate::from_der(bytes)
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ServiceIdentity,
        credentials: &Credentials,
    ) -> Result<SharedChannel, ServerError> {
        let cert = trust_anchor(credentials.trust_anchor()).map_err(|e| {
            ServerError::open_session_failed(format!("invalid trust anchor: {e}"))
        })?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(cert)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| {
                ServerError::open_session_failed(format!("failed to build TLS client: {e}"))
            })?;

        tracing::debug!(%endpoint, %identity, "secured channel configured");
        Ok(Arc::new(HttpsChannel::with_client(
            http,
            endpoint.https_url(),
            identity.clone(),
            credentials,
        )))
    }
}

/// JSON-over-HTTPS channel to the serving front door.
pub struct HttpsChannel {
    http: reqwest::Client,
    base_url: String,
    identity: ServiceIdentity,
    auth_info: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LaunchStatusBody {
    current_count: u32,
    scheduled_count: u32,
    state: String,
    #[serde(default)]
    session: Option<SessionInfo>,
    #[serde(default)]
    message: Option<String>,
}

impl LaunchStatusBody {
    fn into_status(self) -> Result<LaunchStatus, ServerError> {
        let state = match self.state.as_str() {
            "pending" => LaunchState::Pending,
            "ready" => match self.session {
                Some(session) => LaunchState::Ready { session },
                None => {
                    return Err(ServerError::launch_failed(
                        "launch reported ready without a session",
                    ))
                }
            },
            "failed" => LaunchState::Failed {
                message: self.message.unwrap_or_else(|| "launch failed".to_string()),
            },
            other => {
                return Err(ServerError::launch_failed(format!(
                    "unknown launch state {other:?}"
                )))
            }
        };
        Ok(LaunchStatus {
            current_count: self.current_count,
            scheduled_count: self.scheduled_count,
            state,
        })
    }
}

#[derive(Debug, Deserialize)]
struct InferBody {
    #[serde(default)]
    results: Option<Vec<ResultRecord>>,
}

/// Map a non-success response to a `ServerError`. The body's `error.code`
/// wins over `fallback` when it names a known kind.
fn classify(status: StatusCode, body: &str, fallback: ServerErrorKind) -> ServerError {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);
    let kind = match detail.as_ref().and_then(|d| d.code.as_deref()) {
        Some("no_server_available") => ServerErrorKind::NoServerAvailable,
        Some("open_session_failed") => ServerErrorKind::OpenSessionFailed,
        Some("launch_failed") => ServerErrorKind::LaunchFailed,
        _ => fallback,
    };
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| body.trim().to_string());
    ServerError::new(kind, format!("{status}: {message}"))
}

async fn check(resp: Response, fallback: ServerErrorKind) -> Result<Response, ServerError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, &body, fallback))
}

fn transport_error(err: reqwest::Error, kind: ServerErrorKind) -> ServerError {
    ServerError::new(kind, err.to_string())
}

impl HttpsChannel {
    /// Channel over an already configured client. `base_url` is e.g.
    /// `https://host:port`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        identity: ServiceIdentity,
        credentials: &Credentials,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            identity,
            auth_info: credentials.auth_header(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(AUTH_HEADER, &self.auth_info)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        kind: ServerErrorKind,
    ) -> Result<Response, ServerError> {
        let resp = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| transport_error(e, kind))?;
        check(resp, kind).await
    }
}

#[async_trait]
impl Channel for HttpsChannel {
    async fn open_session(&self) -> Result<SessionInfo, ServerError> {
        let kind = ServerErrorKind::OpenSessionFailed;
        let resp = self
            .send(
                self.http.post(self.url("/v1/sessions")).json(&self.identity),
                kind,
            )
            .await?;
        resp.json().await.map_err(|e| transport_error(e, kind))
    }

    async fn launch(&self) -> Result<LaunchTicket, ServerError> {
        let kind = ServerErrorKind::LaunchFailed;
        let resp = self
            .send(
                self.http.post(self.url("/v1/launches")).json(&self.identity),
                kind,
            )
            .await?;
        resp.json().await.map_err(|e| transport_error(e, kind))
    }

    async fn launch_status(&self, ticket: &LaunchTicket) -> Result<LaunchStatus, ServerError> {
        let kind = ServerErrorKind::LaunchFailed;
        let path = format!("/v1/launches/{}", ticket.launch_id);
        let resp = self.send(self.http.get(self.url(&path)), kind).await?;
        let body: LaunchStatusBody = resp.json().await.map_err(|e| transport_error(e, kind))?;
        body.into_status()
    }

    async fn infer(
        &self,
        session: &SessionInfo,
        input: Vec<u8>,
    ) -> Result<Option<Vec<ResultRecord>>, ServerError> {
        let kind = ServerErrorKind::Other;
        let path = format!("/v1/sessions/{}/infer", session.session_id);
        let builder = self
            .http
            .post(self.url(&path))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(input);
        let resp = self.send(builder, kind).await?;
        let body: InferBody = resp.json().await.map_err(|e| transport_error(e, kind))?;
        Ok(body.results)
    }

    async fn close_session(&self, session: &SessionInfo) -> Result<(), ServerError> {
        let path = format!("/v1/sessions/{}", session.session_id);
        self.send(self.http.delete(self.url(&path)), ServerErrorKind::Other)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn error(status: HttpStatus, code: &str, message: &str) -> AxumResponse {
        (
            status,
            Json(json!({"error": {"code": code, "message": message}})),
        )
            .into_response()
    }

    async fn open_session(headers: HeaderMap, Json(body): Json<Value>) -> AxumResponse {
        if headers.get(AUTH_HEADER).is_none() {
            return error(HttpStatus::UNAUTHORIZED, "unauthorized", "missing auth info");
        }
        if body["type_name"] == "segment" {
            return error(
                HttpStatus::SERVICE_UNAVAILABLE,
                "no_server_available",
                "0 running instances",
            );
        }
        Json(json!({"session_id": "s1", "instance": "detect-0"})).into_response()
    }

    async fn launch() -> AxumResponse {
        Json(json!({"launch_id": "l1", "scheduled_count": 2})).into_response()
    }

    async fn launch_status(Path(id): Path<String>) -> AxumResponse {
        match id.as_str() {
            "l1" => Json(json!({"current_count": 1, "scheduled_count": 2, "state": "pending"}))
                .into_response(),
            "ready" => Json(json!({
                "current_count": 2,
                "scheduled_count": 2,
                "state": "ready",
                "session": {"session_id": "s9", "instance": "detect-1"}
            }))
            .into_response(),
            _ => error(HttpStatus::NOT_FOUND, "launch_not_found", "no such launch"),
        }
    }

    async fn infer(Path(id): Path<String>) -> AxumResponse {
        if id == "quiet" {
            return Json(json!({"results": null})).into_response();
        }
        Json(json!({"results": [{"label": "cat", "score": 0.9}]})).into_response()
    }

    async fn close(Path(id): Path<String>) -> AxumResponse {
        if id == "gone" {
            return error(HttpStatus::NOT_FOUND, "session_not_found", "no such session");
        }
        HttpStatus::NO_CONTENT.into_response()
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/v1/sessions", post(open_session))
            .route("/v1/sessions/:id/infer", post(infer))
            .route("/v1/sessions/:id", axum::routing::delete(close))
            .route("/v1/launches", post(launch))
            .route("/v1/launches/:id", get(launch_status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn channel(base_url: String, service_type: &str) -> HttpsChannel {
        let creds = Credentials::from_json(r#"{"user_id":"u1"}"#, Vec::new()).unwrap();
        HttpsChannel::with_client(
            reqwest::Client::new(),
            base_url,
            ServiceIdentity::new(service_type, "v1").unwrap(),
            &creds,
        )
    }

    fn session(id: &str) -> SessionInfo {
        SessionInfo {
            session_id: id.to_string(),
            instance: "detect-0".to_string(),
        }
    }

    #[test]
    fn test_classify_prefers_known_code() {
        let err = classify(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":{"code":"no_server_available","message":"0 running"}}"#,
            ServerErrorKind::OpenSessionFailed,
        );
        assert_eq!(err.kind, ServerErrorKind::NoServerAvailable);
        assert!(err.detail.contains("0 running"));

        let err = classify(
            StatusCode::BAD_GATEWAY,
            "upstream reset",
            ServerErrorKind::OpenSessionFailed,
        );
        assert_eq!(err.kind, ServerErrorKind::OpenSessionFailed);
        assert!(err.detail.contains("upstream reset"));
    }

    #[test]
    fn test_launch_status_body() {
        let body: LaunchStatusBody = serde_json::from_value(json!({
            "current_count": 2, "scheduled_count": 2, "state": "ready"
        }))
        .unwrap();
        assert_eq!(
            body.into_status().unwrap_err().kind,
            ServerErrorKind::LaunchFailed
        );

        let body: LaunchStatusBody = serde_json::from_value(json!({
            "current_count": 0, "scheduled_count": 2, "state": "failed", "message": "no capacity"
        }))
        .unwrap();
        assert_eq!(
            body.into_status().unwrap().state,
            LaunchState::Failed {
                message: "no capacity".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unusable_trust_anchor_fails_connect() {
        let transport = HttpsTransport::default();
        let endpoint = Endpoint::new("localhost", 52001);
        let identity = ServiceIdentity::new("detect", "v1").unwrap();

        for anchor in [vec![0x30, 0x82, 0x01, 0x0a], b"not a certificate".to_vec()] {
            let creds = Credentials::from_json("{}", anchor).unwrap();
            let err = match transport.connect(&endpoint, &identity, &creds).await {
                Ok(_) => panic!("connect accepted an unusable trust anchor"),
                Err(err) => err,
            };
            assert_eq!(err.kind, ServerErrorKind::OpenSessionFailed);
        }
    }

    #[tokio::test]
    async fn test_open_session_over_http() {
        let base = serve().await;

        let session = channel(base.clone(), "detect").open_session().await.unwrap();
        assert_eq!(session.session_id, "s1");

        let err = channel(base, "segment").open_session().await.unwrap_err();
        assert_eq!(err.kind, ServerErrorKind::NoServerAvailable);
    }

    #[tokio::test]
    async fn test_launch_and_poll_over_http() {
        let base = serve().await;
        let ch = channel(base, "detect");

        let ticket = ch.launch().await.unwrap();
        assert_eq!(ticket.scheduled_count, 2);
        let status = ch.launch_status(&ticket).await.unwrap();
        assert_eq!((status.current_count, status.state), (1, LaunchState::Pending));

        let ready = LaunchTicket {
            launch_id: "ready".into(),
            scheduled_count: 2,
        };
        assert_eq!(
            ch.launch_status(&ready).await.unwrap().state,
            LaunchState::Ready {
                session: SessionInfo {
                    session_id: "s9".into(),
                    instance: "detect-1".into()
                }
            }
        );

        let missing = LaunchTicket {
            launch_id: "nope".into(),
            scheduled_count: 2,
        };
        assert_eq!(
            ch.launch_status(&missing).await.unwrap_err().kind,
            ServerErrorKind::LaunchFailed
        );
    }

    #[tokio::test]
    async fn test_infer_and_close_over_http() {
        let base = serve().await;
        let ch = channel(base, "detect");

        let records = ch.infer(&session("s1"), b"img".to_vec()).await.unwrap();
        assert_eq!(records.map(|r| r.len()), Some(1));
        assert_eq!(ch.infer(&session("quiet"), Vec::new()).await.unwrap(), None);

        ch.close_session(&session("s1")).await.unwrap();
        let err = ch.close_session(&session("gone")).await.unwrap_err();
        assert_eq!(err.kind, ServerErrorKind::Other);
    }
}
