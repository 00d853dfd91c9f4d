use std::path::Path;

use anyhow::{Context, Result, bail};
use artship_git::{ChangeKind, Credentials, TreeChange, Vcs};
use serde::{Deserialize, Serialize};

use crate::descriptor::CommitDescriptor;
use crate::engine::Reporter;
use crate::refs::ShortRef;

/// `<short hash> <first line of the source message>`.
pub fn commit_message(desc: &CommitDescriptor) -> String {
    format!("{} {}", desc.short_hash, desc.subject())
        .trim_end()
        .to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub other: usize,
}

impl ChangeSummary {
    pub fn from_changes(changes: &[TreeChange]) -> Self {
        let mut s = Self::default();
        for c in changes {
            match c.kind {
                ChangeKind::Added | ChangeKind::Untracked => s.added += 1,
                ChangeKind::Modified => s.modified += 1,
                ChangeKind::Deleted => s.deleted += 1,
                ChangeKind::Renamed => s.renamed += 1,
                ChangeKind::Other => s.other += 1,
            }
        }
        s
    }

    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted + self.renamed + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedCommit {
    pub hash: String,
    pub message: String,
    pub changes: ChangeSummary,
}

pub struct PublishRequest<'a> {
    pub vcs: &'a dyn Vcs,
    pub staging: &'a Path,
    pub remote: &'a str,
    pub branch: &'a ShortRef,
    pub descriptor: &'a CommitDescriptor,
    pub creds: Option<&'a Credentials>,
}

/// Stages the whole worktree, commits it as the source committer and
/// force-pushes it to the branch. A commit is made even when nothing
/// changed.
pub fn publish(req: &PublishRequest<'_>, reporter: &mut dyn Reporter) -> Result<PublishedCommit> {
    let vcs = req.vcs;
    vcs.stage_all(req.staging)
        .context("failed to stage artifact tree")?;
    let changes = ChangeSummary::from_changes(&vcs.status(req.staging)?);
    if changes.total() == 0 {
        reporter.info("artifact tree unchanged; committing anyway");
    } else {
        reporter.info(&format!(
            "{} added, {} modified, {} deleted",
            changes.added,
            changes.modified + changes.renamed + changes.other,
            changes.deleted
        ));
    }

    let message = commit_message(req.descriptor);
    let hash = vcs
        .commit(req.staging, &message, &req.descriptor.committer)
        .context("failed to commit artifacts")?;
    reporter.info(&format!(
        "committed {} as {} <{}>",
        &hash[..hash.len().min(7)],
        req.descriptor.committer.name,
        req.descriptor.committer.email
    ));

    let outcome = vcs
        .push(req.staging, req.remote, req.branch.as_str(), true, req.creds)
        .with_context(|| format!("failed to run push to {}", req.remote))?;
    if !outcome.ok {
        bail!(
            "force-push of {} to {} failed: {}",
            req.branch,
            req.remote,
            outcome.detail.trim()
        );
    }
    reporter.info(&format!("pushed {} to {}", req.branch, req.remote));

    Ok(PublishedCommit {
        hash,
        message,
        changes,
    })
}
