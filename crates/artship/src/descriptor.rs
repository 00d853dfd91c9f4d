use std::path::Path;

use anyhow::{Context, Result};
use artship_git::{Identity, Vcs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Reporter;
use crate::environment::{HeadCommit, TriggerContext};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("event payload head_commit has no {0}")]
    MissingField(&'static str),
    #[error("commit hash {0:?} is not a 40 character hex object id")]
    InvalidHash(String),
    #[error("source repository has no commits")]
    EmptyHistory,
}

/// The source commit being published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDescriptor {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub committer: Identity,
    pub url: Option<String>,
}

impl CommitDescriptor {
    pub fn new(
        hash: &str,
        message: impl Into<String>,
        committer: Identity,
        url: Option<String>,
    ) -> Result<Self, DescriptorError> {
        let hash = hash.trim();
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DescriptorError::InvalidHash(hash.to_string()));
        }
        Ok(Self {
            hash: hash.to_string(),
            short_hash: hash[..7].to_string(),
            message: message.into(),
            committer,
            url,
        })
    }

    /// First line of the message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim_end()
    }
}

/// Builds the descriptor from the event payload when it carries a head
/// commit, else from the latest commit in `repo`.
pub fn extract(
    vcs: &dyn Vcs,
    repo: &Path,
    trigger: &TriggerContext,
    reporter: &mut dyn Reporter,
) -> Result<CommitDescriptor> {
    let desc = match &trigger.head_commit {
        Some(head) => {
            reporter.debug("using head commit from event payload");
            from_event(head, trigger)?
        }
        None => {
            reporter.debug("reading latest commit from history");
            from_history(vcs, repo, trigger)?
        }
    };
    if let Some(sha) = trigger.sha.as_deref().map(str::trim).filter(|s| !s.is_empty())
        && !sha.eq_ignore_ascii_case(&desc.hash)
    {
        reporter.warn(&format!(
            "publishing commit {} but the CI run reports {sha}",
            desc.short_hash
        ));
    }
    Ok(desc)
}

pub fn from_event(
    head: &HeadCommit,
    trigger: &TriggerContext,
) -> Result<CommitDescriptor, DescriptorError> {
    let id = head.id.as_deref().ok_or(DescriptorError::MissingField("id"))?;
    let message = head
        .message
        .as_deref()
        .ok_or(DescriptorError::MissingField("message"))?;
    let committer = head
        .committer
        .as_ref()
        .ok_or(DescriptorError::MissingField("committer"))?;
    let name = committer
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or(DescriptorError::MissingField("committer name"))?;
    let email = committer
        .email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or(DescriptorError::MissingField("committer email"))?;

    let url = head
        .url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| trigger.commit_url(id.trim()));
    CommitDescriptor::new(id, message, Identity::new(name, email), url)
}

pub fn from_history(
    vcs: &dyn Vcs,
    repo: &Path,
    trigger: &TriggerContext,
) -> Result<CommitDescriptor> {
    let entries = vcs
        .log(repo, 1)
        .with_context(|| format!("failed to read latest commit in {}", repo.display()))?;
    let latest = entries
        .into_iter()
        .next()
        .ok_or(DescriptorError::EmptyHistory)?;
    let url = trigger.commit_url(&latest.hash);
    Ok(CommitDescriptor::new(
        &latest.hash,
        latest.message,
        latest.committer,
        url,
    )?)
}
