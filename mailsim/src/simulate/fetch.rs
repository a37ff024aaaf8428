//! Outbound fetches for opens and clicks.
//!
//! One pooled client is shared by every job. Transport failures are retried a
//! bounded number of times; an HTTP status is final.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{redirect, Client};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::SimulationSettings;
use crate::error::FetchError;

/// Pause before the n-th retry is `RETRY_BACKOFF * n`.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// What a fetch is for; only used to label log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Open,
    Click,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Open => "open",
            FetchKind::Click => "click",
        }
    }
}

/// Result of one fetch, after any retries.
#[derive(Debug)]
pub struct FetchReport {
    pub url: String,
    pub kind: FetchKind,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Final status on success.
    pub result: Result<u16, FetchError>,
}

impl FetchReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    max_attempts: u32,
}

impl Fetcher {
    pub fn new(settings: &SimulationSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(100)
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            timeout: settings.request_timeout(),
            max_attempts: settings.fetch_max_attempts.max(1),
        })
    }

    /// Fetch `url`, retrying transport failures.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap, kind: FetchKind) -> FetchReport {
        let started = Instant::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            match self.fetch_once(url, headers).await {
                Err(e) if e.is_transient() && attempts < self.max_attempts => {
                    warn!(
                        url = url,
                        kind = kind.as_str(),
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "fetch_retrying"
                    );
                    sleep(RETRY_BACKOFF * attempts).await;
                }
                other => break other,
            }
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(status) => info!(
                url = url,
                kind = kind.as_str(),
                status_code = status,
                attempts = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "fetch_complete"
            ),
            Err(e) => warn!(
                url = url,
                kind = kind.as_str(),
                attempts = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "fetch_failed"
            ),
        }

        FetchReport {
            url: url.to_string(),
            kind,
            attempts,
            elapsed,
            result,
        }
    }

    async fn fetch_once(&self, url: &str, headers: &HeaderMap) -> Result<u16, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| classify(url, source))?;

        let status = response.status().as_u16();
        if (200..400).contains(&status) {
            Ok(status)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status,
            })
        }
    }
}

fn classify(url: &str, source: reqwest::Error) -> FetchError {
    if source.is_redirect() {
        FetchError::TooManyRedirects {
            url: url.to_string(),
        }
    } else {
        FetchError::Transient {
            url: url.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::user_agent::build_headers;
    use httpmock::prelude::*;

    fn fetcher(max_redirects: usize, attempts: u32) -> Fetcher {
        Fetcher::new(&SimulationSettings {
            max_redirects,
            fetch_max_attempts: attempts,
            request_timeout_ms: 2000,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_sends_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/pixel.gif")
                .header("user-agent", "TestAgent/1.0");
            then.status(200).body("GIF89a");
        });

        let report = fetcher(10, 2)
            .fetch(&server.url("/pixel.gif"), &build_headers("TestAgent/1.0"), FetchKind::Open)
            .await;

        mock.assert_calls(1);
        assert!(report.succeeded());
        assert_eq!(report.attempts, 1);
        assert_eq!(report.result.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });

        let report = fetcher(10, 3)
            .fetch(&server.url("/gone"), &build_headers("T"), FetchKind::Click)
            .await;

        mock.assert_calls(1);
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.result, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_redirects_followed_within_limit() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/r1");
            then.status(302).header("location", server.url("/r2"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/r2");
            then.status(302).header("location", server.url("/landing"));
        });
        let landing = server.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200);
        });

        let report = fetcher(2, 1)
            .fetch(&server.url("/r1"), &build_headers("T"), FetchKind::Click)
            .await;

        landing.assert_calls(1);
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn test_redirect_limit_stops_the_chain() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/r1");
            then.status(302).header("location", server.url("/r2"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/r2");
            then.status(302).header("location", server.url("/landing"));
        });
        let landing = server.mock(|when, then| {
            when.method(GET).path("/landing");
            then.status(200);
        });

        let report = fetcher(1, 3)
            .fetch(&server.url("/r1"), &build_headers("T"), FetchKind::Click)
            .await;

        landing.assert_calls(0);
        assert_eq!(report.attempts, 1);
        assert!(matches!(
            report.result,
            Err(FetchError::TooManyRedirects { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried_then_given_up() {
        // Nothing listens on the discard port locally.
        let report = fetcher(10, 2)
            .fetch("http://127.0.0.1:9/unreachable", &build_headers("T"), FetchKind::Open)
            .await;

        assert_eq!(report.attempts, 2);
        assert!(report.result.as_ref().is_err_and(|e| e.is_transient()));
    }
}
