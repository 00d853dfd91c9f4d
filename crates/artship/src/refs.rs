use std::fmt;
use std::path::Path;

use anyhow::Result;
use artship_git::Vcs;
use thiserror::Error;

use crate::engine::Reporter;
use crate::environment::TriggerContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("no source ref: the trigger carries none and HEAD is not on a branch")]
    Missing,
    #[error("ref {0:?} leaves no branch name once its namespace is stripped")]
    Empty(String),
    #[error("ref {reference:?} is not a usable branch name ({reason})")]
    Invalid {
        reference: String,
        reason: &'static str,
    },
}

/// Branch name on the artifact repository, derived from a source ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortRef(String);

impl ShortRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Drops the first two `/`-separated segments of a fully-qualified ref.
///
/// `refs/heads/feature/login` becomes `feature/login` and `refs/tags/v1.2.0`
/// becomes `v1.2.0`. Input with fewer than three segments that does not sit
/// under `refs/` is taken to be short already.
pub fn strip_namespace(full: &str) -> Result<ShortRef, RefError> {
    let full = full.trim();
    let segments: Vec<&str> = full.split('/').collect();

    let short = if segments.len() >= 3 {
        segments[2..].join("/")
    } else if full.starts_with("refs/") || full == "refs" {
        return Err(RefError::Empty(full.to_string()));
    } else {
        full.to_string()
    };

    if short.is_empty() {
        return Err(RefError::Empty(full.to_string()));
    }
    check_branch_name(full, &short)?;
    Ok(ShortRef(short))
}

fn check_branch_name(reference: &str, short: &str) -> Result<(), RefError> {
    let invalid = |reason| RefError::Invalid {
        reference: reference.to_string(),
        reason,
    };

    if short.starts_with('/') || short.ends_with('/') || short.contains("//") {
        return Err(invalid("empty path segment"));
    }
    if short.contains("..") {
        return Err(invalid("contains '..'"));
    }
    if short.ends_with(".lock") || short.ends_with('.') {
        return Err(invalid("bad suffix"));
    }
    if short.starts_with('-') {
        return Err(invalid("starts with '-'"));
    }
    if short.contains("@{") {
        return Err(invalid("contains '@{'"));
    }
    if short
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || "~^:?*[\\".contains(c))
    {
        return Err(invalid("forbidden character"));
    }
    Ok(())
}

/// The ref named by the trigger, else the repository's current branch.
pub fn source_ref(vcs: &dyn Vcs, repo: &Path, trigger: &TriggerContext) -> Result<String> {
    if let Some(r) = trigger.git_ref.as_deref().filter(|r| !r.trim().is_empty()) {
        return Ok(r.trim().to_string());
    }
    match vcs.current_branch(repo)? {
        Some(branch) => Ok(branch),
        None => Err(RefError::Missing.into()),
    }
}

/// Expands `reference` in `repo` and strips its namespace. An expansion
/// failure is reported and the raw reference is used instead.
pub fn resolve_short_ref(
    vcs: &dyn Vcs,
    repo: &Path,
    reference: &str,
    reporter: &mut dyn Reporter,
) -> Result<ShortRef> {
    let full = match vcs.expand_ref(repo, reference) {
        Ok(full) => {
            reporter.debug(&format!("expanded {reference} to {full}"));
            full
        }
        Err(e) => {
            reporter.warn(&format!(
                "could not expand ref {reference}, using it as given: {e:#}"
            ));
            reference.to_string()
        }
    };
    Ok(strip_namespace(&full)?)
}

/// Reporter-free resolution used by `plan`.
pub fn resolve_quietly(vcs: &dyn Vcs, repo: &Path, trigger: &TriggerContext) -> Result<ShortRef> {
    let reference = source_ref(vcs, repo, trigger)?;
    let mut sink = NullReporter;
    resolve_short_ref(vcs, repo, &reference, &mut sink)
}

struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}
