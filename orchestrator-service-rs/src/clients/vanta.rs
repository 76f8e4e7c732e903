//! Vanta compliance API client.
//!
//! `GET {base}/v1/tests?status=failing` with cursor pagination. Items that
//! fail to parse are logged and skipped so one odd record never hides the
//! rest of a poll.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_handling_rs::{Error, Result, SourceFault};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use shared_types_rs::Failure;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{build_http_client, error_excerpt};
use crate::collaborators::FailureSource;
use crate::rate_limiter::RateLimiters;

const TESTS_ENDPOINT: &str = "/v1/tests";
const PAGE_SIZE: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct TestsResponse {
    #[serde(default)]
    results: Results,
}

#[derive(Debug, Default, Deserialize)]
struct Results {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default, rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default, rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(default, rename = "endCursor")]
    end_cursor: Option<String>,
}

pub struct VantaFailureSource {
    client: Client,
    base_url: String,
    token: String,
    limiters: RateLimiters,
}

impl VantaFailureSource {
    pub fn new(base_url: &str, token: &str, limiters: RateLimiters) -> Result<Self> {
        Ok(Self {
            client: build_http_client(REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            limiters,
        })
    }

    pub fn from_config(config: &config_rs::ServiceConfig, limiters: RateLimiters) -> Result<Self> {
        Self::new(&config.vanta_base_url, &config.vanta_api_token, limiters)
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Results> {
        let page_size = PAGE_SIZE.to_string();
        let mut query = vec![("status", "failing"), ("pageSize", page_size.as_str())];
        if let Some(cursor) = cursor {
            query.push(("pageCursor", cursor));
        }

        let response = self
            .client
            .get(format!("{}{}", self.base_url, TESTS_ENDPOINT))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = error_excerpt(response).await;
            return Err(status_error(status, &body));
        }

        let parsed: TestsResponse = response.json().await.map_err(|e| {
            Error::source_fault(
                SourceFault::MalformedPayload,
                format!("Unreadable failure page: {}", e),
            )
            .cause(e)
        })?;
        Ok(parsed.results)
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    let message = error_handling_rs::redact_secrets(&format!("Failure source request failed: {}", err));
    Error::source_fault(SourceFault::Network, message).cause(err)
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("Failure source returned {}: {}", status, body);
    let error = match status.as_u16() {
        401 | 403 => Error::source_fault(SourceFault::Authentication, message),
        429 => Error::source_fault(SourceFault::RateLimited, message),
        500..=599 => Error::source_fault(SourceFault::Server, message),
        _ => Error::source_fault(SourceFault::Server, message).permanent(),
    };
    error.context("status", status.as_u16())
}

/// Parses page items, keeping those detected at or after `since`.
fn collect_failures(items: Vec<Value>, since: DateTime<Utc>, out: &mut Vec<Failure>) {
    for item in items {
        match serde_json::from_value::<Failure>(item) {
            Ok(failure) if failure.detected_at >= since => out.push(failure),
            Ok(failure) => {
                debug!(test_id = %failure.id, detected_at = %failure.detected_at, "Skipping failure older than poll window");
            }
            Err(e) => warn!(error = %e, "Skipping unparseable failure record"),
        }
    }
}

#[async_trait]
impl FailureSource for VantaFailureSource {
    async fn fetch_failures(&self, since: DateTime<Utc>) -> Result<Vec<Failure>> {
        let mut failures = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            if pages > 0 {
                self.limiters.read.acquire(self.limiters.timeout).await?;
            }
            let page = self.fetch_page(cursor.as_deref()).await?;
            pages += 1;
            collect_failures(page.data, since, &mut failures);

            if !page.page_info.has_next_page {
                break;
            }
            match page.page_info.end_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    warn!(pages, "Failure source reported another page without a cursor");
                    break;
                }
            }
        }

        info!(count = failures.len(), pages, since = %since, "Fetched failing tests");
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling_rs::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn item(id: &str, failed_at: &str) -> Value {
        json!({
            "test_id": id,
            "test_name": format!("test {}", id),
            "resource_arn": format!("arn:aws:s3:::{}", id),
            "resource_type": "AWS::S3::Bucket",
            "failure_reason": "unencrypted",
            "severity": "high",
            "framework": "SOC2",
            "failed_at": failed_at
        })
    }

    fn source(server: &MockServer) -> VantaFailureSource {
        VantaFailureSource::new(&server.uri(), "tok", RateLimiters::unlimited()).unwrap()
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[tokio::test]
    async fn follows_cursor_and_skips_bad_items() {
        let server = MockServer::start().await;
        let page_one = json!({"results": {
            "data": [item("a", "2024-01-01T00:00:00Z"), {"garbage": true}],
            "pageInfo": {"hasNextPage": true, "endCursor": "c1"}
        }});
        let page_two = json!({"results": {
            "data": [item("b", "2024-01-02T00:00:00Z")],
            "pageInfo": {"hasNextPage": false, "endCursor": null}
        }});

        Mock::given(method("GET"))
            .and(path("/v1/tests"))
            .and(query_param("status", "failing"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(move |req: &Request| {
                let second = req.url.query_pairs().any(|(k, v)| k == "pageCursor" && v == "c1");
                ResponseTemplate::new(200).set_body_json(if second { &page_two } else { &page_one })
            })
            .expect(2)
            .mount(&server)
            .await;

        let failures = source(&server).fetch_failures(epoch()).await.unwrap();
        let ids: Vec<_> = failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn filters_by_since() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": {
                "data": [item("old", "2024-01-01T00:00:00Z"), item("new", "2024-03-01T00:00:00Z")],
                "pageInfo": {"hasNextPage": false}
            }})))
            .mount(&server)
            .await;

        let since = DateTime::parse_from_rfc3339("2024-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let failures = source(&server).fetch_failures(since).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "new");
    }

    #[tokio::test]
    async fn classifies_status_codes() {
        let cases = [
            (401, SourceFault::Authentication, false),
            (429, SourceFault::RateLimited, true),
            (503, SourceFault::Server, true),
            (404, SourceFault::Server, false),
        ];
        for (status, fault, retryable) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = source(&server).fetch_failures(epoch()).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Source(fault), "status {}", status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
        }
    }

    #[tokio::test]
    async fn malformed_page_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = source(&server).fetch_failures(epoch()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Source(SourceFault::MalformedPayload));
        assert!(!err.is_retryable());
    }
}
