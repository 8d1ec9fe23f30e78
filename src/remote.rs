//! Remote collaborators: the REST API that validates, persists and reports.
//!
//! The engine only sees the traits. `HttpApi` is the JSON-over-HTTPS
//! implementation used by the CLI; tests substitute in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, SipError};
use crate::models::Record;
use crate::parser::ImportKind;
use crate::reports::ReportFilter;

const USER_AGENT: &str = concat!("sipdesk/", env!("CARGO_PKG_VERSION"));
const REFERENCE_COMMISSION_PATH: &str = "report/reference-commission";

/// Source of the signed-in user's credential and branch context. The engine
/// reads it per request and never stores or refreshes it.
pub trait SessionProvider: Send + Sync {
    fn current_token(&self) -> Option<String>;

    fn current_branch(&self) -> Option<String> {
        None
    }
}

/// Fixed credentials, for tests and one-shot tools.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    pub token: Option<String>,
    pub branch: Option<String>,
}

impl SessionProvider for StaticSession {
    fn current_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn current_branch(&self) -> Option<String> {
        self.branch.clone()
    }
}

/// `{ status, message?, records }` as returned by the verify and commit
/// endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    #[serde(default = "default_accepted", deserialize_with = "boolean_ish")]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub records: Vec<Record>,
}

fn default_accepted() -> bool {
    true
}

impl Default for BatchResponse {
    fn default() -> Self {
        Self {
            status: default_accepted(),
            message: None,
            records: Vec::new(),
        }
    }
}

fn boolean_ish<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "ok" | "success"),
        _ => false,
    })
}

#[async_trait]
pub trait ImportBackend: Send + Sync {
    /// Dry-run validation of a whole batch in one request.
    async fn verify(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse>;

    /// Persists the given records.
    async fn commit(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse>;
}

#[async_trait]
pub trait ReportBackend: Send + Sync {
    /// Raw reference-commission response; normalization happens in
    /// [`crate::reports`].
    async fn reference_commission(&self, filter: &ReportFilter) -> Result<Value>;
}

#[async_trait]
impl<T: ImportBackend + ?Sized> ImportBackend for Arc<T> {
    async fn verify(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse> {
        (**self).verify(kind, records).await
    }

    async fn commit(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse> {
        (**self).commit(kind, records).await
    }
}

#[async_trait]
impl<T: ReportBackend + ?Sized> ReportBackend for Arc<T> {
    async fn reference_commission(&self, filter: &ReportFilter) -> Result<Value> {
        (**self).reference_commission(filter).await
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpApi {
    http_client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration, session: Arc<dyn SessionProvider>) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(SipError::Settings(
                "api_base_url is not set (run `sipdesk config --api-url <url>`)".to_string(),
            ));
        }
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SipError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(token) = self.session.current_token() {
            request = request.bearer_auth(token);
        }
        if let Some(branch) = self.session.current_branch() {
            request = request.header("X-Branch-Id", branch);
        }

        tracing::debug!(%url, "POST");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(SipError::Transport(format!("HTTP {} from {url}: {excerpt}", status.as_u16())));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SipError::Transport(format!("Malformed response from {url}: {e}")))
    }

    async fn post_batch(&self, path: &str, records: &[Record]) -> Result<BatchResponse> {
        let body = json!({ "records": records });
        let value = self.post_json(path, &body).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl ImportBackend for HttpApi {
    async fn verify(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse> {
        self.post_batch(kind.verify_path(), records).await
    }

    async fn commit(&self, kind: ImportKind, records: &[Record]) -> Result<BatchResponse> {
        self.post_batch(kind.commit_path(), records).await
    }
}

#[async_trait]
impl ReportBackend for HttpApi {
    async fn reference_commission(&self, filter: &ReportFilter) -> Result<Value> {
        self.post_json(REFERENCE_COMMISSION_PATH, &filter.to_json()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStatus;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(base, Duration::from_secs(5), Arc::new(StaticSession::default())).unwrap()
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            api("https://api.example.in/v1/").endpoint("/client/import"),
            "https://api.example.in/v1/client/import"
        );
    }

    #[test]
    fn test_missing_base_url_is_a_settings_error() {
        let err = HttpApi::new("  ", Duration::from_secs(5), Arc::new(StaticSession::default()))
            .err()
            .unwrap();
        assert!(matches!(err, SipError::Settings(_)));
    }

    #[test]
    fn test_batch_response_accepts_boolean_ish_status() {
        let r: BatchResponse = serde_json::from_value(json!({
            "status": "true",
            "records": [{"srNo": 1, "status": 1, "message": ""}]
        }))
        .unwrap();
        assert!(r.status);
        assert_eq!(r.records[0].status, RecordStatus::Valid);

        let r: BatchResponse =
            serde_json::from_value(json!({"status": false, "message": "Token expired"})).unwrap();
        assert!(!r.status);
        assert!(r.records.is_empty());
        assert_eq!(r.message.as_deref(), Some("Token expired"));

        let r: BatchResponse = serde_json::from_value(json!({"records": []})).unwrap();
        assert!(r.status);
    }

    /// Accepts one connection, answers it with `status` and `body`, and
    /// hands back the raw request text.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/v1", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });
        (base, handle)
    }

    fn signed_in(base: &str) -> HttpApi {
        let session = StaticSession {
            token: Some("tok-123".into()),
            branch: Some("7".into()),
        };
        HttpApi::new(base, Duration::from_secs(5), Arc::new(session)).unwrap()
    }

    #[tokio::test]
    async fn test_verify_sends_token_branch_and_batch() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"status": true, "records": [{"srNo": 1, "status": true, "message": ""}]}"#,
        )
        .await;
        let api = signed_in(&base);
        let batch = vec![Record::new(1).with("name", "Asha")];

        let response = api.verify(ImportKind::Client, &batch).await.unwrap();
        assert!(response.status);
        assert_eq!(response.records[0].status, RecordStatus::Valid);

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(lower.starts_with("post /v1/client/import/verify http/1.1"));
        assert!(lower.contains("authorization: bearer tok-123"));
        assert!(lower.contains("x-branch-id: 7"));
        assert!(request.contains(r#""records":[{"srNo":1"#));
        assert!(request.contains(r#""name":"Asha""#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error_with_excerpt() {
        let (base, server) = serve_once("500 Internal Server Error", "database down").await;
        let err = signed_in(&base)
            .commit(ImportKind::SipMember, &[Record::new(1)])
            .await
            .unwrap_err();
        let request = server.await.unwrap();
        assert!(request.to_ascii_lowercase().starts_with("post /v1/sip-member/import http/1.1"));
        match err {
            SipError::Transport(msg) => {
                assert!(msg.contains("HTTP 500"), "{msg}");
                assert!(msg.contains("database down"), "{msg}");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_session_sends_no_auth_headers() {
        let (base, server) = serve_once("200 OK", r#"{"detailRows": []}"#).await;
        let api = api(&base);
        let filter = ReportFilter::new().entity("C1002");
        let body = api.reference_commission(&filter).await.unwrap();
        assert_eq!(body, json!({"detailRows": []}));

        let lower = server.await.unwrap().to_ascii_lowercase();
        assert!(lower.starts_with("post /v1/report/reference-commission http/1.1"));
        assert!(!lower.contains("authorization:"));
        assert!(!lower.contains("x-branch-id:"));
    }

    #[tokio::test]
    async fn test_refused_batch_over_the_wire_leaves_session_loaded() {
        use crate::session::{ImportSession, SessionState};

        let (base, server) =
            serve_once("200 OK", r#"{"status": false, "message": "Token expired"}"#).await;
        let session = ImportSession::new(ImportKind::Client, signed_in(&base));
        session.load(vec![Record::new(1).with("name", "Asha")]).unwrap();

        let err = session.verify().await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(&err, SipError::Transport(msg) if msg == "Token expired"));
        assert_eq!(session.state(), SessionState::Loaded);
        assert_eq!(session.records()[0].status, RecordStatus::Unknown);
    }
}
