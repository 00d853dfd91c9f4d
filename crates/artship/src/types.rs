use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use artship_git::Credentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hosting::BootstrapOutcome;
use crate::publish::ChangeSummary;
use crate::stager::StageMode;
use crate::staging::ReconcileState;

/// `package.json`, reduced to the fields publication reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub workspaces: Option<Workspaces>,
    #[serde(default)]
    pub publish_config: Option<PublishConfig>,
}

impl PackageDescriptor {
    /// Workspace member patterns, empty for a single-package repository.
    pub fn workspace_patterns(&self) -> &[String] {
        match &self.workspaces {
            Some(Workspaces::Patterns(p)) => p,
            Some(Workspaces::Config { packages }) => packages,
            None => &[],
        }
    }

    /// Declared build-output directory (`publishConfig.directory`).
    pub fn declared_build_dir(&self) -> Option<&str> {
        self.publish_config
            .as_ref()
            .and_then(|c| c.directory.as_deref())
            .filter(|d| !d.trim().is_empty())
    }
}

/// Both shapes npm and yarn accept for `workspaces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Workspaces {
    Patterns(Vec<String>),
    Config {
        #[serde(default)]
        packages: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub directory: Option<String>,
}

/// One publishable directory and its package descriptor.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub root: PathBuf,
    /// Base name of `root`; keys the staging path.
    pub base: String,
    pub manifest_path: PathBuf,
    pub descriptor: PackageDescriptor,
}

impl SourceUnit {
    pub fn display_name(&self) -> &str {
        self.descriptor.name.as_deref().unwrap_or(&self.base)
    }
}

/// Account that owns artifact repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "login", rename_all = "snake_case")]
pub enum Owner {
    User(String),
    Org(String),
}

impl Owner {
    pub fn login(&self) -> &str {
        match self {
            Owner::User(l) | Owner::Org(l) => l,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Owner::User(_) => "user",
            Owner::Org(_) => "org",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.login())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("repository name {0:?} is empty once its scope is removed")]
    Empty(String),
    #[error("repository name {0:?} is longer than 100 characters")]
    TooLong(String),
    #[error("repository name {name:?} contains {found:?}; only letters, digits, '.', '-' and '_' are allowed")]
    InvalidChar { name: String, found: char },
    #[error("repository name {0:?} is reserved")]
    Reserved(String),
}

/// The hosting repository a unit publishes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRepo {
    pub owner: Owner,
    pub name: String,
}

impl TargetRepo {
    /// Name from `explicit`, else the package name, else the directory base
    /// name; any `@scope/` prefix is dropped.
    pub fn for_unit(
        unit: &SourceUnit,
        owner: &Owner,
        explicit: Option<&str>,
    ) -> Result<Self, TargetError> {
        let raw = explicit
            .or(unit.descriptor.name.as_deref())
            .unwrap_or(&unit.base);
        let name = strip_scope(raw);
        validate_repo_name(name)?;
        Ok(Self {
            owner: owner.clone(),
            name: name.to_string(),
        })
    }

    pub fn remote_url(&self, git_base: &str) -> String {
        format!(
            "{}/{}/{}.git",
            git_base.trim_end_matches('/'),
            self.owner.login(),
            self.name
        )
    }
}

impl fmt::Display for TargetRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner.login(), self.name)
    }
}

pub fn strip_scope(name: &str) -> &str {
    match name.rsplit_once('/') {
        Some((_, rest)) => rest,
        None => name,
    }
}

pub fn validate_repo_name(name: &str) -> Result<(), TargetError> {
    if name.is_empty() {
        return Err(TargetError::Empty(name.to_string()));
    }
    if name.len() > 100 {
        return Err(TargetError::TooLong(name.to_string()));
    }
    if name == "." || name == ".." {
        return Err(TargetError::Reserved(name.to_string()));
    }
    if let Some(found) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
    {
        return Err(TargetError::InvalidChar {
            name: name.to_string(),
            found,
        });
    }
    Ok(())
}

/// Every runtime knob, resolved once before any unit starts.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub work_dir: PathBuf,
    /// Build-output directory, relative to each unit root.
    pub build_dir: Option<PathBuf>,
    /// Parent of all staging clones, relative to `work_dir`.
    pub staging_dir: PathBuf,
    pub owner: Owner,
    pub repo_name: Option<String>,
    pub token: Option<String>,
    pub api_base: String,
    pub git_base: String,
    pub remote_name: String,
    pub create_repo: bool,
    pub fetch_depth: u32,
    pub api_timeout: Duration,
    /// Extra full-tree exclusion patterns.
    pub exclude: Vec<String>,
}

impl RuntimeOptions {
    pub fn staging_root(&self) -> PathBuf {
        if self.staging_dir.is_absolute() {
            self.staging_dir.clone()
        } else {
            self.work_dir.join(&self.staging_dir)
        }
    }

    pub fn staging_path(&self, unit: &SourceUnit) -> PathBuf {
        self.staging_root().join(&unit.base)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(Credentials::token)
    }
}

/// What a successful unit pipeline produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedUnit {
    pub target: TargetRepo,
    pub remote_url: String,
    pub branch: String,
    pub source_hash: String,
    pub artifact_hash: String,
    pub message: String,
    pub mode: StageMode,
    pub reconcile: ReconcileState,
    pub bootstrap: BootstrapOutcome,
    pub changes: ChangeSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitState {
    Published(PublishedUnit),
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReceipt {
    pub unit: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub state: UnitState,
}

impl UnitReceipt {
    pub fn is_published(&self) -> bool {
        matches!(self.state, UnitState::Published(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReceipt {
    pub receipt_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReceipt>,
}

impl RunReceipt {
    pub fn succeeded(&self) -> bool {
        self.units.iter().all(UnitReceipt::is_published)
    }

    pub fn failed_count(&self) -> usize {
        self.units.iter().filter(|u| !u.is_published()).count()
    }
}
