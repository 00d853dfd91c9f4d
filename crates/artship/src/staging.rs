//! Prepares the local clone of an artifact repository.
//!
//! The clone moves through a fixed sequence: reset to an empty directory,
//! initialize, register the remote, then end on the target branch either by
//! fetching it or by creating it fresh. Fetch and branch-creation results are
//! explicit values so a reconciliation that did neither is visible as
//! [`ReconcileState::Unresolved`] rather than hidden.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use artship_git::{Credentials, RemoteRef, Vcs};
use serde::{Deserialize, Serialize};

use crate::engine::Reporter;
use crate::refs::ShortRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    /// Existing remote branch fetched and checked out.
    BranchFetched,
    /// Fresh local branch with no prior history.
    BranchCreated,
    /// Neither fetch nor branch creation succeeded; HEAD is left as
    /// initialized and the push decides.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteView {
    Listed(Vec<RemoteRef>),
    Unavailable(String),
}

impl RemoteView {
    /// `None` when the listing failed and the answer is unknown.
    pub fn has_branch(&self, branch: &ShortRef) -> Option<bool> {
        match self {
            RemoteView::Listed(refs) => {
                let wanted = format!("refs/heads/{branch}");
                Some(refs.iter().any(|r| r.name == wanted))
            }
            RemoteView::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    Created,
    Failed(String),
}

pub struct StagingClone<'a> {
    pub vcs: &'a dyn Vcs,
    pub path: PathBuf,
    pub remote: &'a str,
    pub url: &'a str,
    pub branch: &'a ShortRef,
    pub depth: u32,
    pub creds: Option<&'a Credentials>,
}

impl StagingClone<'_> {
    /// Removes any previous clone and initializes an empty repository.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)
                .with_context(|| format!("failed to remove {}", self.path.display()))?;
        }
        fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;
        self.vcs.init(&self.path)
    }

    pub fn register_remote(&self, reporter: &mut dyn Reporter) -> Result<RemoteView> {
        self.vcs.add_remote(&self.path, self.remote, self.url)?;
        match self.vcs.remote_refs(&self.path, self.url, self.creds) {
            Ok(refs) => {
                reporter.debug(&format!("{} advertises {} ref(s)", self.remote, refs.len()));
                Ok(RemoteView::Listed(refs))
            }
            Err(e) => {
                let msg = format!("{e:#}");
                reporter.warn(&format!("could not list refs of {}: {msg}", self.remote));
                Ok(RemoteView::Unavailable(msg))
            }
        }
    }

    pub fn fetch_branch(&self, view: &RemoteView, reporter: &mut dyn Reporter) -> FetchOutcome {
        if view.has_branch(self.branch) == Some(false) {
            reporter.info(&format!(
                "branch {} does not exist on {} yet",
                self.branch, self.remote
            ));
            return FetchOutcome::Absent;
        }

        let branch = self.branch.as_str();
        let fetched = self
            .vcs
            .fetch(&self.path, self.remote, branch, self.depth, self.creds)
            .and_then(|_| self.vcs.checkout_remote(&self.path, self.remote, branch));
        match fetched {
            Ok(()) => {
                reporter.info(&format!("fetched {}/{}", self.remote, branch));
                FetchOutcome::Fetched
            }
            Err(e) => {
                let msg = format!("{e:#}");
                reporter.warn(&format!("fetch of {}/{branch} failed: {msg}", self.remote));
                FetchOutcome::Failed(msg)
            }
        }
    }

    pub fn create_branch(&self, reporter: &mut dyn Reporter) -> BranchOutcome {
        match self.vcs.create_branch(&self.path, self.branch.as_str(), true) {
            Ok(()) => {
                reporter.info(&format!("created branch {}", self.branch));
                BranchOutcome::Created
            }
            Err(e) => {
                let msg = format!("{e:#}");
                reporter.warn(&format!("could not create branch {}: {msg}", self.branch));
                BranchOutcome::Failed(msg)
            }
        }
    }

    /// Runs the whole sequence. Only a failed reset, init or remote
    /// registration is an error.
    pub fn reconcile(&self, reporter: &mut dyn Reporter) -> Result<ReconcileState> {
        self.reset()?;
        let view = self.register_remote(reporter)?;
        if self.fetch_branch(&view, reporter) == FetchOutcome::Fetched {
            return Ok(ReconcileState::BranchFetched);
        }
        match self.create_branch(reporter) {
            BranchOutcome::Created => Ok(ReconcileState::BranchCreated),
            BranchOutcome::Failed(_) => {
                reporter.warn(&format!(
                    "branch {} could not be fetched or created; continuing on HEAD",
                    self.branch
                ));
                Ok(ReconcileState::Unresolved)
            }
        }
    }

    /// Deletes everything except `.git` so staged content replaces the
    /// previous tree.
    pub fn clear_worktree(&self) -> Result<usize> {
        clear_worktree(&self.path)
    }
}

pub fn clear_worktree(path: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read {}", path.display()))?
    {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let p = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&p)
        } else {
            fs::remove_file(&p)
        }
        .with_context(|| format!("failed to remove {}", p.display()))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use artship_git::{GitCli, Identity, LogEntry, PushOutcome, TreeChange};
    use tempfile::tempdir;

    use super::*;
    use crate::refs::strip_namespace;

    /// Records every call; individual operations can be told to fail.
    #[derive(Default)]
    pub(crate) struct FakeVcs {
        pub calls: Mutex<Vec<String>>,
        pub remote: Vec<RemoteRef>,
        pub fail_listing: bool,
        pub fail_fetch: bool,
        pub fail_branch: bool,
    }

    impl FakeVcs {
        fn record(&self, call: &str) {
            self.calls.lock().expect("lock").push(call.to_string());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock").clone()
        }
    }

    impl Vcs for FakeVcs {
        fn init(&self, _path: &Path) -> Result<()> {
            self.record("init");
            Ok(())
        }
        fn add_remote(&self, _path: &Path, name: &str, _url: &str) -> Result<()> {
            self.record(&format!("add_remote {name}"));
            Ok(())
        }
        fn remote_refs(
            &self,
            _path: &Path,
            _url: &str,
            _creds: Option<&Credentials>,
        ) -> Result<Vec<RemoteRef>> {
            self.record("remote_refs");
            if self.fail_listing {
                bail!("listing failed");
            }
            Ok(self.remote.clone())
        }
        fn fetch(
            &self,
            _path: &Path,
            _remote: &str,
            branch: &str,
            _depth: u32,
            _creds: Option<&Credentials>,
        ) -> Result<()> {
            self.record(&format!("fetch {branch}"));
            if self.fail_fetch {
                bail!("couldn't find remote ref {branch}");
            }
            Ok(())
        }
        fn checkout_remote(&self, _path: &Path, _remote: &str, branch: &str) -> Result<()> {
            self.record(&format!("checkout {branch}"));
            Ok(())
        }
        fn create_branch(&self, _path: &Path, branch: &str, _checkout: bool) -> Result<()> {
            self.record(&format!("create_branch {branch}"));
            if self.fail_branch {
                bail!("branch failed");
            }
            Ok(())
        }
        fn log(&self, _path: &Path, _depth: usize) -> Result<Vec<LogEntry>> {
            Ok(vec![])
        }
        fn current_branch(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn expand_ref(&self, _path: &Path, reference: &str) -> Result<String> {
            Ok(reference.to_string())
        }
        fn status(&self, _path: &Path) -> Result<Vec<TreeChange>> {
            Ok(vec![])
        }
        fn stage_all(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn commit(&self, _path: &Path, _message: &str, _identity: &Identity) -> Result<String> {
            Ok("0".repeat(40))
        }
        fn push(
            &self,
            _path: &Path,
            _remote: &str,
            _branch: &str,
            _force: bool,
            _creds: Option<&Credentials>,
        ) -> Result<PushOutcome> {
            Ok(PushOutcome {
                ok: true,
                detail: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct Collect {
        warns: Vec<String>,
    }

    impl Reporter for Collect {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }
        fn error(&mut self, _msg: &str) {}
    }

    fn main_ref() -> ShortRef {
        strip_namespace("refs/heads/main").expect("ref")
    }

    fn remote_main() -> Vec<RemoteRef> {
        vec![RemoteRef {
            hash: "1".repeat(40),
            name: "refs/heads/main".into(),
        }]
    }

    fn reconcile_with(vcs: &FakeVcs, root: &Path) -> (ReconcileState, Collect) {
        let branch = main_ref();
        let clone = StagingClone {
            vcs,
            path: root.join("stage"),
            remote: "artifact",
            url: "https://example.test/acme/widget.git",
            branch: &branch,
            depth: 1,
            creds: None,
        };
        let mut rep = Collect::default();
        let state = clone.reconcile(&mut rep).expect("reconcile");
        (state, rep)
    }

    #[test]
    fn existing_branch_is_fetched_without_creating() {
        let td = tempdir().expect("tempdir");
        let vcs = FakeVcs {
            remote: remote_main(),
            ..FakeVcs::default()
        };
        let (state, rep) = reconcile_with(&vcs, td.path());
        assert_eq!(state, ReconcileState::BranchFetched);
        assert_eq!(
            vcs.calls(),
            vec![
                "init",
                "add_remote artifact",
                "remote_refs",
                "fetch main",
                "checkout main"
            ]
        );
        assert!(rep.warns.is_empty());
    }

    #[test]
    fn absent_branch_skips_fetch() {
        let td = tempdir().expect("tempdir");
        let vcs = FakeVcs::default();
        let (state, rep) = reconcile_with(&vcs, td.path());
        assert_eq!(state, ReconcileState::BranchCreated);
        assert_eq!(
            vcs.calls(),
            vec!["init", "add_remote artifact", "remote_refs", "create_branch main"]
        );
        assert!(rep.warns.is_empty());
    }

    #[test]
    fn listing_failure_still_attempts_fetch() {
        let td = tempdir().expect("tempdir");
        let vcs = FakeVcs {
            fail_listing: true,
            fail_fetch: true,
            ..FakeVcs::default()
        };
        let (state, rep) = reconcile_with(&vcs, td.path());
        assert_eq!(state, ReconcileState::BranchCreated);
        assert!(vcs.calls().contains(&"fetch main".to_string()));
        assert_eq!(rep.warns.len(), 2);
    }

    #[test]
    fn both_failures_leave_unresolved_state() {
        let td = tempdir().expect("tempdir");
        let vcs = FakeVcs {
            remote: remote_main(),
            fail_fetch: true,
            fail_branch: true,
            ..FakeVcs::default()
        };
        let (state, rep) = reconcile_with(&vcs, td.path());
        assert_eq!(state, ReconcileState::Unresolved);
        assert_eq!(rep.warns.len(), 3);
    }

    #[test]
    fn reset_discards_previous_clone() {
        let td = tempdir().expect("tempdir");
        let stage = td.path().join("stage");
        fs::create_dir_all(stage.join("old")).expect("mkdir");
        fs::write(stage.join("old/file"), "x").expect("write");

        let vcs = FakeVcs::default();
        reconcile_with(&vcs, td.path());
        assert!(stage.is_dir());
        assert!(!stage.join("old").exists());
    }

    #[test]
    fn clear_worktree_keeps_git_dir() {
        let td = tempdir().expect("tempdir");
        fs::create_dir_all(td.path().join(".git/objects")).expect("mkdir");
        fs::create_dir_all(td.path().join("lib")).expect("mkdir");
        fs::write(td.path().join("lib/a.js"), "a").expect("write");
        fs::write(td.path().join("BUILD_INFO"), "x").expect("write");

        assert_eq!(clear_worktree(td.path()).expect("clear"), 2);
        let left: Vec<_> = fs::read_dir(td.path())
            .expect("read")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from(".git")]);
    }

    #[test]
    fn real_git_creates_branch_when_remote_is_empty() {
        let td = tempdir().expect("tempdir");
        let bare = td.path().join("remote.git");
        let out = std::process::Command::new("git")
            .args(["init", "--quiet", "--bare"])
            .arg(&bare)
            .output()
            .expect("git");
        assert!(out.status.success());

        let git = GitCli::new("git");
        let branch = main_ref();
        let url = bare.to_string_lossy().to_string();
        let clone = StagingClone {
            vcs: &git,
            path: td.path().join("stage"),
            remote: "artifact",
            url: &url,
            branch: &branch,
            depth: 1,
            creds: None,
        };
        let mut rep = Collect::default();
        assert_eq!(
            clone.reconcile(&mut rep).expect("reconcile"),
            ReconcileState::BranchCreated
        );
        assert_eq!(
            git.current_branch(&clone.path).expect("branch").as_deref(),
            Some("main")
        );
    }
}
