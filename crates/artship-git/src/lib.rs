//! Git operations for artship.
//!
//! [`Vcs`] is the seam between the publication pipeline and the
//! version-control engine: every repository mutation and every remote
//! transfer the pipeline performs goes through it. [`GitCli`] implements the
//! trait by shelling out to the `git` executable (overridable through
//! `ARTSHIP_GIT_BIN`).
//!
//! # Example
//!
//! ```no_run
//! use artship_git::{GitCli, Vcs};
//! use std::path::Path;
//!
//! let git = GitCli::from_env();
//! let latest = git.log(Path::new("."), 1).unwrap_or_default();
//! if let Some(entry) = latest.first() {
//!     println!("Current commit: {}", entry.hash);
//! }
//! ```

use std::env;
use std::fmt;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the git executable.
pub const GIT_BIN_ENV: &str = "ARTSHIP_GIT_BIN";

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Name and email pair attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// One commit read from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub hash: String,
    pub message: String,
    pub author: Identity,
    pub committer: Identity,
}

/// Classification of a single path in `git status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
    Other,
}

/// A path with pending changes in the working tree or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    pub path: String,
    pub kind: ChangeKind,
}

/// A ref advertised by a remote (`git ls-remote`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub hash: String,
    pub name: String,
}

/// Result of a push. A rejected push is an outcome, not an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub ok: bool,
    /// Combined git output, with credentials redacted.
    pub detail: String,
}

/// HTTP credentials for a remote.
///
/// The token travels as the username with an empty password, sent as a
/// basic authorization header so it never appears in a remote URL.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
}

impl Credentials {
    pub fn token(token: &str) -> Self {
        Self {
            username: token.trim().to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn encoded(&self) -> String {
        STANDARD.encode(format!("{}:", self.username))
    }

    /// Value for git's `http.extraheader`.
    pub fn authorization_header(&self) -> String {
        format!("AUTHORIZATION: basic {}", self.encoded())
    }

    /// Replace every occurrence of the secret (raw or encoded) with `[REDACTED]`.
    pub fn redact(&self, text: &str) -> String {
        if self.username.is_empty() {
            return text.to_string();
        }
        text.replace(&self.encoded(), "[REDACTED]")
            .replace(&self.username, "[REDACTED]")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"[REDACTED]")
            .finish()
    }
}

/// Version-control operations used by the publication pipeline.
pub trait Vcs: Send + Sync {
    /// Initialize an empty repository in an existing directory.
    fn init(&self, path: &Path) -> Result<()>;

    fn add_remote(&self, path: &Path, name: &str, url: &str) -> Result<()>;

    /// List refs advertised by `url` without touching local state.
    fn remote_refs(
        &self,
        path: &Path,
        url: &str,
        creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteRef>>;

    /// Shallow, single-branch fetch of `branch` into `refs/remotes/<remote>/<branch>`.
    fn fetch(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        depth: u32,
        creds: Option<&Credentials>,
    ) -> Result<()>;

    /// Check out `branch` as a local branch tracking `<remote>/<branch>`.
    fn checkout_remote(&self, path: &Path, remote: &str, branch: &str) -> Result<()>;

    fn create_branch(&self, path: &Path, branch: &str, checkout: bool) -> Result<()>;

    /// Most recent `depth` commits reachable from `HEAD`, newest first.
    fn log(&self, path: &Path, depth: usize) -> Result<Vec<LogEntry>>;

    /// Branch `HEAD` points at, or `None` when detached.
    fn current_branch(&self, path: &Path) -> Result<Option<String>>;

    /// Expand a possibly abbreviated ref to its fully-qualified name.
    fn expand_ref(&self, path: &Path, reference: &str) -> Result<String>;

    fn status(&self, path: &Path) -> Result<Vec<TreeChange>>;

    /// Stage every addition, modification and deletion under `path`.
    fn stage_all(&self, path: &Path) -> Result<()>;

    /// Commit the index with `identity` as author and committer; returns the new hash.
    fn commit(&self, path: &Path, message: &str, identity: &Identity) -> Result<String>;

    /// Push `HEAD` to `refs/heads/<branch>` on `remote`.
    fn push(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        force: bool,
        creds: Option<&Credentials>,
    ) -> Result<PushOutcome>;
}

/// [`Vcs`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_env()
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `ARTSHIP_GIT_BIN` when set, otherwise `git` from `PATH`.
    pub fn from_env() -> Self {
        Self::new(env::var(GIT_BIN_ENV).unwrap_or_else(|_| "git".to_string()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `git --version`, trimmed.
    pub fn version(&self) -> Result<String> {
        let out = Command::new(&self.program)
            .arg("--version")
            .output()
            .context("failed to execute git --version; is git installed?")?;
        if !out.status.success() {
            bail!(
                "git --version failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn command(&self, dir: &Path, creds: Option<&Credentials>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(c) = creds {
            cmd.arg("-c")
                .arg(format!("http.extraheader={}", c.authorization_header()));
        }
        cmd
    }

    fn run(&self, dir: &Path, args: &[&str], creds: Option<&Credentials>) -> Result<Output> {
        let subcommand = args.iter().find(|a| !a.starts_with('-')).copied();
        self.command(dir, creds)
            .args(args)
            .output()
            .with_context(|| {
                format!(
                    "failed to execute git {}; is git installed?",
                    subcommand.unwrap_or_default()
                )
            })
    }

    fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        creds: Option<&Credentials>,
    ) -> Result<String> {
        let out = self.run(dir, args, creds)?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "git {} failed: {}",
                args.join(" "),
                redact(creds, stderr.trim())
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }
}

fn redact(creds: Option<&Credentials>, text: &str) -> String {
    match creds {
        Some(c) => c.redact(text),
        None => text.to_string(),
    }
}

impl Vcs for GitCli {
    fn init(&self, path: &Path) -> Result<()> {
        self.run_checked(path, &["init", "--quiet"], None)?;
        Ok(())
    }

    fn add_remote(&self, path: &Path, name: &str, url: &str) -> Result<()> {
        self.run_checked(path, &["remote", "add", name, url], None)?;
        Ok(())
    }

    fn remote_refs(
        &self,
        path: &Path,
        url: &str,
        creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteRef>> {
        let stdout = self.run_checked(path, &["ls-remote", url], creds)?;
        Ok(parse_ls_remote(&stdout))
    }

    fn fetch(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        depth: u32,
        creds: Option<&Credentials>,
    ) -> Result<()> {
        let depth = format!("--depth={depth}");
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        self.run_checked(
            path,
            &["fetch", "--quiet", "--no-tags", depth.as_str(), remote, refspec.as_str()],
            creds,
        )?;
        Ok(())
    }

    fn checkout_remote(&self, path: &Path, remote: &str, branch: &str) -> Result<()> {
        let upstream = format!("{remote}/{branch}");
        self.run_checked(
            path,
            &["checkout", "--quiet", "-b", branch, "--track", upstream.as_str()],
            None,
        )?;
        Ok(())
    }

    fn create_branch(&self, path: &Path, branch: &str, checkout: bool) -> Result<()> {
        if checkout {
            self.run_checked(path, &["checkout", "--quiet", "-b", branch], None)?;
        } else {
            self.run_checked(path, &["branch", branch], None)?;
        }
        Ok(())
    }

    fn log(&self, path: &Path, depth: usize) -> Result<Vec<LogEntry>> {
        let count = format!("--max-count={depth}");
        let format = "--format=%H%x1f%an%x1f%ae%x1f%cn%x1f%ce%x1f%B%x1e";
        let stdout = self.run_checked(path, &["log", count.as_str(), format], None)?;
        parse_log(&stdout)
    }

    fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let out = self.run(path, &["symbolic-ref", "--quiet", "--short", "HEAD"], None)?;
        if !out.status.success() {
            return Ok(None);
        }
        let branch = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if branch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(branch))
        }
    }

    fn expand_ref(&self, path: &Path, reference: &str) -> Result<String> {
        let stdout =
            self.run_checked(path, &["rev-parse", "--symbolic-full-name", reference], None)?;
        let full = stdout.lines().next().unwrap_or_default().trim().to_string();
        if full.is_empty() {
            bail!("{reference} does not name a branch or tag");
        }
        Ok(full)
    }

    fn status(&self, path: &Path) -> Result<Vec<TreeChange>> {
        let stdout = self.run_checked(
            path,
            &["status", "--porcelain", "--untracked-files=all"],
            None,
        )?;
        Ok(parse_status(&stdout))
    }

    fn stage_all(&self, path: &Path) -> Result<()> {
        self.run_checked(path, &["add", "--all", "."], None)?;
        Ok(())
    }

    fn commit(&self, path: &Path, message: &str, identity: &Identity) -> Result<String> {
        let out = self
            .command(path, None)
            .args([
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "--no-verify",
                "--allow-empty",
                "-m",
                message,
            ])
            .env("GIT_AUTHOR_NAME", &identity.name)
            .env("GIT_AUTHOR_EMAIL", &identity.email)
            .env("GIT_COMMITTER_NAME", &identity.name)
            .env("GIT_COMMITTER_EMAIL", &identity.email)
            .output()
            .context("failed to execute git commit; is git installed?")?;
        if !out.status.success() {
            bail!(
                "git commit failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }

        let head = self.run_checked(path, &["rev-parse", "HEAD"], None)?;
        Ok(head.trim().to_string())
    }

    fn push(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        force: bool,
        creds: Option<&Credentials>,
    ) -> Result<PushOutcome> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let mut args = vec!["push", "--porcelain"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        args.push(refspec.as_str());

        let out = self.run(path, &args, creds)?;
        let mut detail = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !stderr.trim().is_empty() {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(stderr.trim());
        }

        Ok(PushOutcome {
            ok: out.status.success(),
            detail: redact(creds, &detail),
        })
    }
}

fn parse_ls_remote(stdout: &str) -> Vec<RemoteRef> {
    stdout
        .lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            Some(RemoteRef {
                hash: hash.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

fn parse_log(stdout: &str) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for record in stdout.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
        if fields.len() != 6 {
            bail!("unexpected git log record: {record:?}");
        }
        entries.push(LogEntry {
            hash: fields[0].trim().to_string(),
            author: Identity::new(fields[1], fields[2]),
            committer: Identity::new(fields[3], fields[4]),
            message: fields[5].trim_end_matches('\n').to_string(),
        });
    }
    Ok(entries)
}

fn parse_status(stdout: &str) -> Vec<TreeChange> {
    stdout
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let code = &line[..2];
            // Format is "XY path" or "XY old -> new" for renames.
            let raw: String = line.chars().skip(3).collect();
            let path = match raw.split_once(" -> ") {
                Some((_, new)) => new.to_string(),
                None => raw,
            };
            TreeChange {
                path,
                kind: classify(code),
            }
        })
        .collect()
}

fn classify(code: &str) -> ChangeKind {
    if code == "??" {
        return ChangeKind::Untracked;
    }
    let mut chars = code.chars();
    let index = chars.next().unwrap_or(' ');
    let worktree = chars.next().unwrap_or(' ');
    let flag = if index != ' ' { index } else { worktree };
    match flag {
        'A' => ChangeKind::Added,
        'M' | 'T' => ChangeKind::Modified,
        'D' => ChangeKind::Deleted,
        'R' | 'C' => ChangeKind::Renamed,
        _ => ChangeKind::Other,
    }
}
