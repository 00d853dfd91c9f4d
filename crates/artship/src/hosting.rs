use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::Reporter;
use crate::types::{Owner, TargetRepo};

/// Outcome of asking the hosting service for a repository. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Created,
    AlreadyExists,
    Failed { message: String },
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Created,
    AlreadyExists,
}

/// Repository management on the hosting service.
pub trait HostingApi: Send + Sync {
    /// Create `name` under the account the token belongs to.
    fn create_user_repo(&self, name: &str) -> Result<CreateStatus>;

    fn create_org_repo(&self, org: &str, name: &str) -> Result<CreateStatus>;
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_base: String,
    token: Option<String>,
    http: Client,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("artship/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            http,
        })
    }

    fn create(&self, path: &str, name: &str) -> Result<CreateStatus> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self
            .http
            .post(url)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "name": name, "auto_init": true }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().context("repository create request failed")?;
        let status = resp.status();
        match status {
            StatusCode::CREATED | StatusCode::OK => Ok(CreateStatus::Created),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = resp.text().unwrap_or_default();
                if body.contains("already exists") {
                    Ok(CreateStatus::AlreadyExists)
                } else {
                    bail!("repository {name} was rejected: {}", api_message(&body))
                }
            }
            StatusCode::UNAUTHORIZED => {
                bail!("unauthorized; token is missing or invalid")
            }
            StatusCode::FORBIDDEN => {
                bail!("forbidden; token may lack the scope to create repositories")
            }
            StatusCode::NOT_FOUND => bail!("not found; check the owner name and token access"),
            s => bail!("unexpected status while creating repository: {s}"),
        }
    }
}

impl HostingApi for GitHubClient {
    fn create_user_repo(&self, name: &str) -> Result<CreateStatus> {
        self.create("/user/repos", name)
    }

    fn create_org_repo(&self, org: &str, name: &str) -> Result<CreateStatus> {
        self.create(&format!("/orgs/{org}/repos"), name)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

fn api_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string())
}

/// Ensures `target` exists. Every failure is downgraded to a warning; the
/// later push surfaces real access problems.
pub fn bootstrap(
    api: &dyn HostingApi,
    target: &TargetRepo,
    reporter: &mut dyn Reporter,
) -> BootstrapOutcome {
    let result = match &target.owner {
        Owner::User(_) => api.create_user_repo(&target.name),
        Owner::Org(org) => api.create_org_repo(org, &target.name),
    };

    match result {
        Ok(CreateStatus::Created) => {
            reporter.info(&format!("created repository {target}"));
            BootstrapOutcome::Created
        }
        Ok(CreateStatus::AlreadyExists) => {
            reporter.warn(&format!("repository {target} already exists; reusing it"));
            BootstrapOutcome::AlreadyExists
        }
        Err(e) => {
            let message = format!("{e:#}");
            reporter.warn(&format!("could not create repository {target}: {message}"));
            BootstrapOutcome::Failed { message }
        }
    }
}
