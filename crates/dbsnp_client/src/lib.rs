//! NCBI dbSNP Variation Services client.
//!
//! Fetches `refsnp` records for an rsID with per-attempt timeouts, bounded
//! retries and upstream pacing, and converts them into validated
//! [`RawVariantRecord`]s.

pub mod payload;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;
use common::config::DbSnpConfig;
use common::{Error, FetchError, FetchErrorKind, RawVariantRecord, VariantIdentifier};
use std::error::Error as StdError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use payload::parse_refsnp;
pub use rate_limit::RateLimiter;
pub use retry::{AttemptOutcome, RetryPolicy};

/// Anything that can produce raw frequency data for an identifier.
#[async_trait]
pub trait VariantSource: Send + Sync {
    /// One logical fetch. Implementations retry transient failures
    /// internally and return promptly with `cancelled` once `cancel` fires.
    async fn fetch(
        &self,
        id: &VariantIdentifier,
        cancel: &CancellationToken,
    ) -> Result<RawVariantRecord, FetchError>;
}

/// How an HTTP status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    Transient,
    NotFound,
    Rejected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Ok,
        404 => StatusClass::NotFound,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so network failures (DNS/TLS/socket) are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn summarize_body(raw: &str) -> String {
    const MAX_CHARS: usize = 500;
    let compact = raw.replace(['\n', '\r'], " ");
    match compact.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &compact[..cut]),
        None => compact,
    }
}

/// dbSNP REST client with connection pooling, pacing and retries.
#[derive(Debug, Clone)]
pub struct DbSnpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    limiter: RateLimiter,
}

impl DbSnpClient {
    pub fn new(config: &DbSnpConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("snp-frequency-bot/0.1")
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.attempt_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build dbSNP HTTP client: {e}")))?;

        let api_key = Some(config.api_key.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string);

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            policy: RetryPolicy::new(config.max_attempts, config.backoff_base()),
            limiter: RateLimiter::per_second(config.requests_per_second),
        })
    }

    /// URL helper.
    fn url(&self, id: &VariantIdentifier) -> String {
        format!("{}/refsnp/{}", self.base_url, id.numeric())
    }

    async fn attempt(&self, id: &VariantIdentifier, n: u32) -> AttemptOutcome<RawVariantRecord> {
        self.limiter.wait().await;

        let url = self.url(id);
        debug!("Fetching dbSNP refsnp (attempt {}): {}", n, url);

        let mut req = self.client.get(&url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.query(&[("api_key", key.as_str())]);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                return AttemptOutcome::Transient(FetchError::transient(format!(
                    "HTTP error for {}: {}",
                    id,
                    format_reqwest_error(&e)
                )));
            }
        };

        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                return AttemptOutcome::Transient(FetchError::transient(format!(
                    "failed reading body for {}: {}",
                    id,
                    format_reqwest_error(&e)
                )));
            }
        };

        match classify_status(status) {
            StatusClass::Ok => match parse_refsnp(id, &body) {
                Ok(record) => {
                    debug!("Got {} populations for {}", record.populations.len(), id);
                    AttemptOutcome::Success(record)
                }
                Err(e) => AttemptOutcome::Fatal(e),
            },
            StatusClass::NotFound => AttemptOutcome::Fatal(FetchError::not_found(format!(
                "{id} not found in dbSNP"
            ))),
            StatusClass::Transient => AttemptOutcome::Transient(FetchError::transient(format!(
                "dbSNP returned {} for {}: {}",
                status,
                id,
                summarize_body(&body)
            ))),
            StatusClass::Rejected => AttemptOutcome::Fatal(FetchError::new(
                FetchErrorKind::Rejected,
                format!("dbSNP returned {} for {}: {}", status, id, summarize_body(&body)),
            )),
        }
    }
}

#[async_trait]
impl VariantSource for DbSnpClient {
    async fn fetch(
        &self,
        id: &VariantIdentifier,
        cancel: &CancellationToken,
    ) -> Result<RawVariantRecord, FetchError> {
        retry::run(&self.policy, cancel, |n| self.attempt(id, n)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const GNOMAD_BODY: &str = r#"{"refsnp_id": "429358", "primary_snapshot_data": {"allele_annotations": [
        {"frequency": [{"study_name": "GnomAD", "observation": {"deleted_sequence": "T", "inserted_sequence": "C"}, "allele_count": 300, "total_count": 2000}]}
    ]}}"#;

    #[derive(Clone)]
    enum Reply {
        Status(u16, &'static str),
        /// Accept the connection and never answer.
        Hang,
    }

    async fn read_request_head(socket: &mut TcpStream) {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Local HTTP server answering the n-th connection with `replies[n]`
    /// (the last reply repeats). Returns its base URL and a connection count.
    async fn canned_server(replies: Vec<Reply>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = replies[n.min(replies.len() - 1)].clone();
                tokio::spawn(async move {
                    read_request_head(&mut socket).await;
                    match reply {
                        Reply::Status(status, body) => {
                            let response = format!(
                                "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                                status,
                                body.len(),
                                body
                            );
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                        Reply::Hang => {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    }
                });
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn client_for(base_url: String) -> DbSnpClient {
        DbSnpClient::new(&DbSnpConfig {
            base_url,
            attempt_timeout_secs: 1,
            max_attempts: 3,
            backoff_base_ms: 1,
            requests_per_second: 0,
            ..DbSnpConfig::default()
        })
        .unwrap()
    }

    fn rs429358() -> VariantIdentifier {
        VariantIdentifier::parse("rs429358").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_successful_response() {
        let (url, hits) = canned_server(vec![Reply::Status(200, GNOMAD_BODY)]).await;
        let client = client_for(url);

        let record = client
            .fetch(&rs429358(), &CancellationToken::new())
            .await
            .expect("200 with a valid body should parse");
        assert_eq!(record.populations.len(), 1);
        assert_eq!(record.populations[0].label, "GnomAD");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_503_then_succeeds() {
        let (url, hits) = canned_server(vec![
            Reply::Status(503, "busy"),
            Reply::Status(503, "busy"),
            Reply::Status(200, GNOMAD_BODY),
        ])
        .await;
        let client = client_for(url);

        let record = client.fetch(&rs429358(), &CancellationToken::new()).await;
        assert!(record.is_ok(), "third attempt should succeed: {:?}", record);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_on_429_after_three_attempts() {
        let (url, hits) = canned_server(vec![Reply::Status(429, "slow down")]).await;
        let client = client_for(url);

        let err = client
            .fetch(&rs429358(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Transient);
        assert!(err.message.contains("429"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_404_is_not_retried() {
        let (url, hits) = canned_server(vec![Reply::Status(404, "{}")]).await;
        let client = client_for(url);

        let err = client
            .fetch(&rs429358(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NotFound);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_bad_body_is_invalid_data() {
        let (url, hits) = canned_server(vec![Reply::Status(200, "{not json")]).await;
        let client = client_for(url);

        let err = client
            .fetch(&rs429358(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::InvalidData);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_transient() {
        let (url, hits) = canned_server(vec![Reply::Hang]).await;
        let client = DbSnpClient::new(&DbSnpConfig {
            base_url: url,
            attempt_timeout_secs: 1,
            max_attempts: 2,
            backoff_base_ms: 1,
            requests_per_second: 0,
            ..DbSnpConfig::default()
        })
        .unwrap();

        let err = client
            .fetch(&rs429358(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Transient);
        assert!(err.message.contains("after 2 attempts"), "{}", err.message);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_request() {
        let (url, hits) = canned_server(vec![Reply::Hang]).await;
        let client = client_for(url);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = client.fetch(&rs429358(), &cancel).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(hits.load(Ordering::SeqCst) <= 1);
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(200), StatusClass::Ok);
        assert_eq!(classify_status(404), StatusClass::NotFound);
        assert_eq!(classify_status(429), StatusClass::Transient);
        assert_eq!(classify_status(500), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(400), StatusClass::Rejected);
        assert_eq!(classify_status(403), StatusClass::Rejected);
    }

    #[test]
    fn test_url_uses_numeric_part() {
        let config = DbSnpConfig {
            base_url: "https://example.org/variation/v0/".into(),
            ..DbSnpConfig::default()
        };
        let client = DbSnpClient::new(&config).unwrap();
        let id = VariantIdentifier::parse("RS429358").unwrap();
        assert_eq!(client.url(&id), "https://example.org/variation/v0/refsnp/429358");
    }

    #[test]
    fn test_summarize_body_truncates_on_char_boundary() {
        let long = "é".repeat(800);
        let summary = summarize_body(&long);
        assert!(summary.ends_with('…'));
        assert_eq!(summary.chars().count(), 501);
    }
}
