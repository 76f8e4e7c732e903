//! GitHub REST client for publishing fixes.
//!
//! Every operation tolerates the "already exists" answers another instance
//! racing on the same branch would produce.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use error_handling_rs::{redact_secrets, Error, PublishFault, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{build_http_client, error_excerpt};
use crate::collaborators::{BranchOutcome, HostingService, ReviewRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentInfo {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
    #[serde(default)]
    number: u64,
}

pub struct GitHubHosting {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubHosting {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        Ok(Self {
            client: build_http_client(REQUEST_TIMEOUT)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_config(config: &config_rs::ServiceConfig) -> Result<Self> {
        Self::new(&config.github_api_url, &config.github_token)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<Response> {
        builder.send().await.map_err(|e| {
            Error::publish(
                PublishFault::Network,
                redact_secrets(&format!("{} failed: {}", action, e)),
            )
            .cause(e)
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response, action: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            Error::publish(PublishFault::Rejected, format!("{}: unexpected response: {}", action, e))
                .cause(e)
        })
    }

    async fn head_sha(&self, repo: &str, branch: &str) -> Result<String> {
        let action = "Look up base branch";
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/repos/{}/git/ref/heads/{}", repo, branch)), action)
            .await?;
        let response = ensure_success(response, action).await?;
        let git_ref: GitRef = Self::json(response, action).await?;
        Ok(git_ref.object.sha)
    }

    /// Blob sha of `path` on `branch`, if the file exists there.
    async fn file_sha(&self, repo: &str, branch: &str, path: &str) -> Result<Option<String>> {
        let action = "Look up file";
        let response = self
            .send(
                self.request(reqwest::Method::GET, &format!("/repos/{}/contents/{}", repo, path))
                    .query(&[("ref", branch)]),
                action,
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, action).await?;
        let info: ContentInfo = Self::json(response, action).await?;
        Ok(Some(info.sha))
    }

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) {
        if labels.is_empty() || number == 0 {
            return;
        }
        let action = "Add labels";
        let result = match self
            .send(
                self.request(reqwest::Method::POST, &format!("/repos/{}/issues/{}/labels", repo, number))
                    .json(&json!({ "labels": labels })),
                action,
            )
            .await
        {
            Ok(response) => ensure_success(response, action).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(repository = %repo, number, error = %e.summary(), "Failed to add labels to review request");
        }
    }
}

/// Maps an unsuccessful status to a publish fault.
fn status_error(status: StatusCode, quota_exhausted: bool, action: &str, body: &str) -> Error {
    let message = format!("{} returned {}: {}", action, status, body);
    let fault = match status.as_u16() {
        401 => PublishFault::Authentication,
        429 => PublishFault::RateLimited,
        403 if quota_exhausted => PublishFault::RateLimited,
        409 => PublishFault::Conflict,
        500..=599 => PublishFault::Network,
        _ => PublishFault::Rejected,
    };
    Error::publish(fault, message).context("status", status.as_u16())
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.trim() == "0");
    let body = error_excerpt(response).await;
    Err(status_error(status, exhausted, action, &body))
}

#[async_trait]
impl HostingService for GitHubHosting {
    async fn default_branch(&self, repo: &str) -> Result<String> {
        let action = "Look up repository";
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/repos/{}", repo)), action)
            .await?;
        let response = ensure_success(response, action).await?;
        let info: RepoInfo = Self::json(response, action).await?;
        Ok(info.default_branch)
    }

    async fn create_branch(&self, repo: &str, branch: &str, base: &str) -> Result<BranchOutcome> {
        let sha = self.head_sha(repo, base).await?;
        let action = "Create branch";
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("/repos/{}/git/refs", repo))
                    .json(&json!({ "ref": format!("refs/heads/{}", branch), "sha": sha })),
                action,
            )
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = error_excerpt(response).await;
            if body.contains("Reference already exists") {
                info!(repository = %repo, branch = %branch, "Branch already exists");
                return Ok(BranchOutcome::AlreadyExists);
            }
            return Err(status_error(StatusCode::UNPROCESSABLE_ENTITY, false, action, &body));
        }
        ensure_success(response, action).await?;
        info!(repository = %repo, branch = %branch, base = %base, "Created branch");
        Ok(BranchOutcome::Created)
    }

    async fn find_review_request(&self, repo: &str, branch: &str) -> Result<Option<String>> {
        let owner = repo.split('/').next().unwrap_or(repo);
        let head = format!("{}:{}", owner, branch);
        let action = "List review requests";
        let response = self
            .send(
                self.request(reqwest::Method::GET, &format!("/repos/{}/pulls", repo))
                    .query(&[("state", "open"), ("head", head.as_str())]),
                action,
            )
            .await?;
        let response = ensure_success(response, action).await?;
        let pulls: Vec<PullRequest> = Self::json(response, action).await?;
        Ok(pulls.into_iter().next().map(|pr| pr.html_url))
    }

    async fn commit_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<()> {
        let existing = self.file_sha(repo, branch, path).await?;
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = &existing {
            body["sha"] = json!(sha);
        }

        let action = "Commit file";
        let response = self
            .send(
                self.request(reqwest::Method::PUT, &format!("/repos/{}/contents/{}", repo, path)).json(&body),
                action,
            )
            .await?;
        ensure_success(response, action).await?;
        debug!(repository = %repo, branch = %branch, path = %path, updated = existing.is_some(), "Committed file");
        Ok(())
    }

    async fn open_review_request(&self, repo: &str, request: &ReviewRequest) -> Result<String> {
        let action = "Open review request";
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("/repos/{}/pulls", repo)).json(&json!({
                    "title": request.title,
                    "body": request.body,
                    "head": request.head,
                    "base": request.base,
                })),
                action,
            )
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = error_excerpt(response).await;
            if body.contains("already exists") {
                if let Some(url) = self.find_review_request(repo, &request.head).await? {
                    info!(repository = %repo, url = %url, "Review request already open");
                    return Ok(url);
                }
                return Err(Error::publish(
                    PublishFault::Conflict,
                    format!("Review request for {} reported as existing but not found", request.head),
                ));
            }
            return Err(status_error(StatusCode::UNPROCESSABLE_ENTITY, false, action, &body));
        }

        let response = ensure_success(response, action).await?;
        let pr: PullRequest = Self::json(response, action).await?;
        self.add_labels(repo, pr.number, &request.labels).await;
        info!(repository = %repo, url = %pr.html_url, "Opened review request");
        Ok(pr.html_url)
    }
}
