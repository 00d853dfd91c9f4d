use std::time::Instant;

use anyhow::{Context, Result};
use artship_git::Vcs;
use chrono::Utc;

use crate::descriptor;
use crate::environment::TriggerContext;
use crate::hosting::{self, BootstrapOutcome, HostingApi};
use crate::publish::{self, PublishRequest};
use crate::refs;
use crate::stager::{self, BuildInfo, ExclusionFilter, StageRequest};
use crate::staging::{ReconcileState, StagingClone};
use crate::types::{
    PublishedUnit, RuntimeOptions, SourceUnit, TargetRepo, UnitReceipt, UnitState,
};

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
    fn debug(&mut self, _msg: &str) {}
}

/// External services a unit pipeline talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub vcs: &'a dyn Vcs,
    pub hosting: &'a dyn HostingApi,
}

/// Publishes one unit: resolve ref, describe the source commit, bootstrap
/// the target repository, reconcile the staging clone, stage artifacts, then
/// commit and force-push.
pub fn run_unit(
    unit: &SourceUnit,
    opts: &RuntimeOptions,
    trigger: &TriggerContext,
    deps: Collaborators<'_>,
    reporter: &mut dyn Reporter,
) -> Result<PublishedUnit> {
    let reference = refs::source_ref(deps.vcs, &unit.root, trigger)?;
    let branch = refs::resolve_short_ref(deps.vcs, &unit.root, &reference, reporter)?;
    reporter.info(&format!("publishing {reference} as branch {branch}"));

    let desc = descriptor::extract(deps.vcs, &unit.root, trigger, reporter)?;
    reporter.debug(&format!("source commit {}", desc.hash));

    let target = TargetRepo::for_unit(unit, &opts.owner, opts.repo_name.as_deref())?;
    let remote_url = target.remote_url(&opts.git_base);
    let bootstrap = if opts.create_repo {
        hosting::bootstrap(deps.hosting, &target, reporter)
    } else {
        reporter.debug("repository creation disabled");
        BootstrapOutcome::Skipped
    };

    let creds = opts.credentials();
    let clone = StagingClone {
        vcs: deps.vcs,
        path: opts.staging_path(unit),
        remote: &opts.remote_name,
        url: &remote_url,
        branch: &branch,
        depth: opts.fetch_depth,
        creds: creds.as_ref(),
    };
    let reconcile = clone
        .reconcile(reporter)
        .with_context(|| format!("failed to prepare staging clone {}", clone.path.display()))?;
    if reconcile == ReconcileState::Unresolved {
        reporter.warn("staging clone is not on the target branch; the push may be rejected");
    }
    clone.clear_worktree()?;

    let build_dir = stager::resolve_build_dir(unit, opts);
    let filter = ExclusionFilter::from_options(opts);
    let build_info = BuildInfo::new(&desc, Utc::now());
    let mode = stager::stage_artifacts(
        &StageRequest {
            unit,
            staging: &clone.path,
            build_dir: build_dir.as_deref(),
            filter: &filter,
            build_info: &build_info,
        },
        reporter,
    )?;

    let published = publish::publish(
        &PublishRequest {
            vcs: deps.vcs,
            staging: &clone.path,
            remote: &opts.remote_name,
            branch: &branch,
            descriptor: &desc,
            creds: creds.as_ref(),
        },
        reporter,
    )?;

    Ok(PublishedUnit {
        target,
        remote_url,
        branch: branch.to_string(),
        source_hash: desc.hash,
        artifact_hash: published.hash,
        message: published.message,
        mode,
        reconcile,
        bootstrap,
        changes: published.changes,
    })
}

/// [`run_unit`] with timing; a failure becomes a failed receipt instead of
/// an error so other units keep going.
pub fn publish_unit(
    unit: &SourceUnit,
    opts: &RuntimeOptions,
    trigger: &TriggerContext,
    deps: Collaborators<'_>,
    reporter: &mut dyn Reporter,
) -> UnitReceipt {
    let started_at = Utc::now();
    let start = Instant::now();
    let state = match run_unit(unit, opts, trigger, deps, reporter) {
        Ok(published) => UnitState::Published(published),
        Err(e) => {
            let message = format!("{e:#}");
            reporter.error(&format!("publication failed: {message}"));
            UnitState::Failed { message }
        }
    };
    UnitReceipt {
        unit: unit.display_name().to_string(),
        started_at,
        finished_at: Utc::now(),
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        state,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::bail;
    use artship_git::GitCli;
    use tempfile::tempdir;

    use super::*;
    use crate::environment::{EventIdentity, HeadCommit};
    use crate::hosting::CreateStatus;
    use crate::stager::{BUILD_INFO_FILE, StageMode};
    use crate::types::{Owner, PackageDescriptor};

    pub(crate) const HASH: &str = "deadbeef0123456789abcdef0123456789abcdef";

    #[derive(Default)]
    pub(crate) struct CollectingReporter {
        pub infos: Vec<String>,
        pub warns: Vec<String>,
        pub errors: Vec<String>,
    }

    impl Reporter for CollectingReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }
        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }
        fn error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }

    /// Records create calls and answers with a fixed status.
    #[derive(Default)]
    pub(crate) struct FakeHosting {
        pub calls: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl HostingApi for FakeHosting {
        fn create_user_repo(&self, name: &str) -> Result<CreateStatus> {
            self.calls.lock().expect("lock").push(format!("user {name}"));
            if self.fail {
                bail!("forbidden");
            }
            Ok(CreateStatus::Created)
        }

        fn create_org_repo(&self, org: &str, name: &str) -> Result<CreateStatus> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("org {org} {name}"));
            if self.fail {
                bail!("forbidden");
            }
            Ok(CreateStatus::Created)
        }
    }

    pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git");
        assert!(out.status.success(), "git {args:?}: {out:?}");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// Source repository at `root` with one commit on `main`.
    pub(crate) fn source_repo(root: &Path, package_json: &str) {
        fs::create_dir_all(root).expect("mkdir");
        git(root, &["init", "--quiet", "-b", "main"]);
        git(root, &["config", "user.name", "Dev"]);
        git(root, &["config", "user.email", "dev@example.com"]);
        fs::write(root.join("package.json"), package_json).expect("write");
        git(root, &["add", "."]);
        git(root, &["commit", "--quiet", "-m", "Release v2\n\nchangelog..."]);
    }

    /// Bare repository at `<git_base>/<owner>/<name>.git`.
    pub(crate) fn bare_remote(git_base: &Path, owner: &str, name: &str) -> PathBuf {
        let dir = git_base.join(owner);
        fs::create_dir_all(&dir).expect("mkdir");
        git(&dir, &["init", "--quiet", "--bare", &format!("{name}.git")]);
        dir.join(format!("{name}.git"))
    }

    pub(crate) fn options(work_dir: &Path, git_base: &Path) -> RuntimeOptions {
        RuntimeOptions {
            work_dir: work_dir.to_path_buf(),
            build_dir: Some(PathBuf::from("dist")),
            staging_dir: PathBuf::from("tmp"),
            owner: Owner::Org("acme".into()),
            repo_name: None,
            token: None,
            api_base: "http://127.0.0.1:9".into(),
            git_base: git_base.to_string_lossy().to_string(),
            remote_name: "artifact".into(),
            create_repo: true,
            fetch_depth: 1,
            api_timeout: Duration::from_secs(1),
            exclude: vec![],
        }
    }

    pub(crate) fn unit_at(root: &Path) -> SourceUnit {
        let manifest_path = root.join("package.json");
        let descriptor: PackageDescriptor =
            serde_json::from_str(&fs::read_to_string(&manifest_path).expect("read"))
                .expect("parse");
        SourceUnit {
            root: root.to_path_buf(),
            base: root
                .file_name()
                .expect("name")
                .to_string_lossy()
                .to_string(),
            manifest_path,
            descriptor,
        }
    }

    fn event_trigger() -> TriggerContext {
        TriggerContext {
            git_ref: Some("refs/heads/main".into()),
            head_commit: Some(HeadCommit {
                id: Some(HASH.into()),
                message: Some("Release v2\n\nchangelog...".into()),
                url: None,
                committer: Some(EventIdentity {
                    name: Some("Release Bot".into()),
                    email: Some("bot@example.com".into()),
                }),
            }),
            server_url: Some("https://github.com".into()),
            repository: Some("acme/widget-src".into()),
            ..TriggerContext::default()
        }
    }

    fn tree(bare: &Path, branch: &str) -> BTreeSet<String> {
        git(bare, &["ls-tree", "-r", "--name-only", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn publishes_build_output_to_matching_branch() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("widget");
        source_repo(&work, r#"{"name":"@acme/widget"}"#);
        fs::create_dir_all(work.join("dist")).expect("mkdir");
        fs::write(work.join("dist/index.js"), "built").expect("write");
        let remotes = td.path().join("remotes");
        let bare = bare_remote(&remotes, "acme", "widget");

        let hosting = FakeHosting::default();
        let git_cli = GitCli::new("git");
        let deps = Collaborators {
            vcs: &git_cli,
            hosting: &hosting,
        };
        let mut rep = CollectingReporter::default();
        let published = run_unit(
            &unit_at(&work),
            &options(&work, &remotes),
            &event_trigger(),
            deps,
            &mut rep,
        )
        .expect("publish");

        assert_eq!(published.branch, "main");
        assert_eq!(published.message, "deadbee Release v2");
        assert_eq!(published.mode, StageMode::BuildOutput);
        assert_eq!(published.reconcile, ReconcileState::BranchCreated);
        assert_eq!(published.bootstrap, BootstrapOutcome::Created);
        assert_eq!(
            hosting.calls.lock().expect("lock").clone(),
            vec!["org acme widget".to_string()]
        );

        assert_eq!(
            git(&bare, &["log", "-1", "--format=%s", "refs/heads/main"]),
            "deadbee Release v2"
        );
        assert_eq!(
            tree(&bare, "refs/heads/main"),
            BTreeSet::from([
                BUILD_INFO_FILE.to_string(),
                "index.js".to_string(),
                "package.json".to_string()
            ])
        );
        let build_info = git(&bare, &["show", "refs/heads/main:BUILD_INFO"]);
        let lines: Vec<&str> = build_info.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], HASH);
        assert_eq!(
            lines[2],
            "https://github.com/acme/widget-src/commit/deadbeef0123456789abcdef0123456789abcdef"
        );
        assert!(rep.errors.is_empty());
    }

    #[test]
    fn republish_replaces_previous_tree() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("widget");
        source_repo(&work, r#"{"name":"widget"}"#);
        let dist = work.join("dist");
        fs::create_dir_all(&dist).expect("mkdir");
        fs::write(dist.join("A"), "a").expect("write");
        fs::write(dist.join("B"), "b").expect("write");
        let remotes = td.path().join("remotes");
        let bare = bare_remote(&remotes, "acme", "widget");

        let hosting = FakeHosting::default();
        let git_cli = GitCli::new("git");
        let deps = Collaborators {
            vcs: &git_cli,
            hosting: &hosting,
        };
        let mut opts = options(&work, &remotes);
        opts.create_repo = false;
        let unit = unit_at(&work);
        let trigger = event_trigger();

        let first = run_unit(&unit, &opts, &trigger, deps, &mut CollectingReporter::default())
            .expect("first publish");
        assert_eq!(first.bootstrap, BootstrapOutcome::Skipped);

        fs::remove_file(dist.join("A")).expect("rm");
        fs::write(dist.join("C"), "c").expect("write");
        let second = run_unit(&unit, &opts, &trigger, deps, &mut CollectingReporter::default())
            .expect("second publish");

        assert_eq!(second.reconcile, ReconcileState::BranchFetched);
        assert_eq!(second.changes.deleted, 1);
        assert_eq!(
            tree(&bare, "refs/heads/main"),
            BTreeSet::from([
                "B".to_string(),
                "C".to_string(),
                BUILD_INFO_FILE.to_string(),
                "package.json".to_string()
            ])
        );
        assert_eq!(
            git(&bare, &["rev-list", "--count", "refs/heads/main"]),
            "2"
        );
        assert!(hosting.calls.lock().expect("lock").is_empty());
    }

    #[test]
    fn history_descriptor_and_full_tree_without_build_dir() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("tool");
        source_repo(&work, r#"{"name":"tool"}"#);
        fs::create_dir_all(work.join("src")).expect("mkdir");
        fs::write(work.join("src/main.js"), "x").expect("write");
        fs::create_dir_all(work.join("node_modules/dep")).expect("mkdir");
        fs::write(work.join("node_modules/dep/index.js"), "x").expect("write");
        let source_head = git(&work, &["rev-parse", "HEAD"]);
        let remotes = td.path().join("remotes");
        let bare = bare_remote(&remotes, "octo", "tool");

        let mut opts = options(&work, &remotes);
        opts.owner = Owner::User("octo".into());
        opts.build_dir = None;
        opts.create_repo = false;
        let git_cli = GitCli::new("git");
        let published = run_unit(
            &unit_at(&work),
            &opts,
            &TriggerContext::default(),
            Collaborators {
                vcs: &git_cli,
                hosting: &FakeHosting::default(),
            },
            &mut CollectingReporter::default(),
        )
        .expect("publish");

        assert_eq!(published.mode, StageMode::FullTree);
        assert_eq!(published.source_hash, source_head);
        assert_eq!(
            tree(&bare, "refs/heads/main"),
            BTreeSet::from([
                BUILD_INFO_FILE.to_string(),
                "package.json".to_string(),
                "src/main.js".to_string()
            ])
        );
        assert_eq!(
            git(&bare, &["log", "-1", "--format=%an <%ae>", "refs/heads/main"]),
            "Dev <dev@example.com>"
        );
    }

    #[test]
    fn bootstrap_failure_is_not_fatal() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("widget");
        source_repo(&work, r#"{"name":"widget"}"#);
        let remotes = td.path().join("remotes");
        bare_remote(&remotes, "acme", "widget");

        let hosting = FakeHosting {
            fail: true,
            ..FakeHosting::default()
        };
        let git_cli = GitCli::new("git");
        let mut rep = CollectingReporter::default();
        let published = run_unit(
            &unit_at(&work),
            &options(&work, &remotes),
            &event_trigger(),
            Collaborators {
                vcs: &git_cli,
                hosting: &hosting,
            },
            &mut rep,
        )
        .expect("publish");
        assert!(matches!(published.bootstrap, BootstrapOutcome::Failed { .. }));
        assert!(rep.warns.iter().any(|w| w.contains("could not create repository")));
    }

    #[test]
    fn push_failure_yields_failed_receipt() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("widget");
        source_repo(&work, r#"{"name":"widget"}"#);
        let remotes = td.path().join("remotes");

        let git_cli = GitCli::new("git");
        let mut rep = CollectingReporter::default();
        let receipt = publish_unit(
            &unit_at(&work),
            &options(&work, &remotes),
            &event_trigger(),
            Collaborators {
                vcs: &git_cli,
                hosting: &FakeHosting::default(),
            },
            &mut rep,
        );
        assert_eq!(receipt.unit, "widget");
        match receipt.state {
            UnitState::Failed { message } => assert!(message.contains("force-push")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(rep.errors.len(), 1);
    }

    #[test]
    fn invalid_event_descriptor_fails_unit() {
        let td = tempdir().expect("tempdir");
        let work = td.path().join("widget");
        source_repo(&work, r#"{"name":"widget"}"#);
        let mut trigger = event_trigger();
        if let Some(head) = trigger.head_commit.as_mut() {
            head.committer = None;
        }

        let git_cli = GitCli::new("git");
        let err = run_unit(
            &unit_at(&work),
            &options(&work, td.path()),
            &trigger,
            Collaborators {
                vcs: &git_cli,
                hosting: &FakeHosting::default(),
            },
            &mut CollectingReporter::default(),
        )
        .expect_err("descriptor error");
        assert!(err.to_string().contains("committer"));
    }
}
