//! CI detection and the trigger context a run was started with.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CI providers recognised from their well-known environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiEnvironment {
    GitHubActions,
    GitLabCi,
    CircleCi,
    Jenkins,
    Buildkite,
    Local,
}

impl CiEnvironment {
    pub fn name(self) -> &'static str {
        match self {
            CiEnvironment::GitHubActions => "GitHub Actions",
            CiEnvironment::GitLabCi => "GitLab CI",
            CiEnvironment::CircleCi => "CircleCI",
            CiEnvironment::Jenkins => "Jenkins",
            CiEnvironment::Buildkite => "Buildkite",
            CiEnvironment::Local => "local",
        }
    }
}

pub fn detect_environment() -> CiEnvironment {
    if is_set("GITHUB_ACTIONS") {
        CiEnvironment::GitHubActions
    } else if is_set("GITLAB_CI") {
        CiEnvironment::GitLabCi
    } else if is_set("CIRCLECI") {
        CiEnvironment::CircleCi
    } else if is_set("JENKINS_URL") {
        CiEnvironment::Jenkins
    } else if is_set("BUILDKITE") {
        CiEnvironment::Buildkite
    } else {
        CiEnvironment::Local
    }
}

fn is_set(key: &str) -> bool {
    var(key).is_some()
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `head_commit` of a push event payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub committer: Option<EventIdentity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIdentity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

impl EventPayload {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse event payload JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read event payload {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }
}

/// What the CI run knows about the change that triggered it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerContext {
    pub git_ref: Option<String>,
    pub sha: Option<String>,
    pub head_commit: Option<HeadCommit>,
    pub server_url: Option<String>,
    pub repository: Option<String>,
}

impl TriggerContext {
    /// Reads `GITHUB_REF`, `GITHUB_SHA`, `GITHUB_SERVER_URL`,
    /// `GITHUB_REPOSITORY` and the payload at `GITHUB_EVENT_PATH`.
    /// `event_path` overrides the latter.
    pub fn from_env(event_path: Option<&Path>) -> Result<Self> {
        let event_path = event_path
            .map(Path::to_path_buf)
            .or_else(|| var("GITHUB_EVENT_PATH").map(Into::into));

        let payload = match event_path {
            Some(p) => EventPayload::load(&p)?,
            None => EventPayload::default(),
        };

        Ok(Self {
            git_ref: var("GITHUB_REF").or(payload.git_ref),
            sha: var("GITHUB_SHA"),
            head_commit: payload.head_commit,
            server_url: var("GITHUB_SERVER_URL"),
            repository: var("GITHUB_REPOSITORY"),
        })
    }

    pub fn with_ref(mut self, reference: Option<String>) -> Self {
        if let Some(r) = reference.filter(|r| !r.trim().is_empty()) {
            self.git_ref = Some(r);
        }
        self
    }

    /// Permalink for `hash` in the source repository, when both the server
    /// and repository are known.
    pub fn commit_url(&self, hash: &str) -> Option<String> {
        let server = self.server_url.as_deref()?;
        let repo = self.repository.as_deref()?;
        Some(format!(
            "{}/{}/commit/{}",
            server.trim_end_matches('/'),
            repo,
            hash
        ))
    }
}
