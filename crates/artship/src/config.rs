//! Configuration file support for artship (`.artship.toml`).
//!
//! Values resolve in the order CLI flag, config file, built-in default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::types::{Owner, RuntimeOptions};

pub const CONFIG_FILE: &str = ".artship.toml";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_GIT_BASE: &str = "https://github.com";
pub const DEFAULT_STAGING_DIR: &str = "tmp";
pub const DEFAULT_REMOTE: &str = "artifact";

/// Who owns the artifact repositories and what they are called.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    /// Fixed repository name; single-unit repositories only.
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default = "default_true")]
    pub create_repo: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            user: None,
            org: None,
            repo_name: None,
            create_repo: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostingConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_git_base")]
    pub git_base: String,
    #[serde(
        default = "default_api_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            git_base: default_git_base(),
            timeout: default_api_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_fetch_depth")]
    pub fetch_depth: u32,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            remote: default_remote(),
            fetch_depth: default_fetch_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Build-output directory relative to each unit root.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Extra names skipped when the whole unit tree is staged.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArtshipConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

/// Values given on the command line; `None` defers to the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub user: Option<String>,
    pub org: Option<String>,
    pub repo_name: Option<String>,
    pub token: Option<String>,
    pub build_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub api_base: Option<String>,
    pub git_base: Option<String>,
    pub api_timeout: Option<Duration>,
    pub no_create_repo: bool,
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_git_base() -> String {
    DEFAULT_GIT_BASE.to_string()
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STAGING_DIR)
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

fn default_fetch_depth() -> u32 {
    1
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

impl ArtshipConfig {
    /// Load `.artship.toml` from `work_dir`.
    ///
    /// Returns `Ok(None)` if no config file exists.
    pub fn load_from_work_dir(work_dir: &Path) -> Result<Option<Self>> {
        let config_path = work_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&config_path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: ArtshipConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.user.is_some() && self.target.org.is_some() {
            bail!("target.user and target.org are mutually exclusive");
        }
        if self.staging.fetch_depth == 0 {
            bail!("staging.fetch_depth must be greater than 0");
        }
        if self.staging.remote.trim().is_empty() {
            bail!("staging.remote cannot be empty");
        }
        if self.staging.dir.as_os_str().is_empty() {
            bail!("staging.dir cannot be empty");
        }
        if self.hosting.timeout.is_zero() {
            bail!("hosting.timeout must be greater than 0");
        }
        for (key, url) in [
            ("hosting.api_base", &self.hosting.api_base),
            ("hosting.git_base", &self.hosting.git_base),
        ] {
            if url.trim().is_empty() {
                bail!("{key} cannot be empty");
            }
        }
        if let Some(name) = &self.target.repo_name {
            crate::types::validate_repo_name(name)
                .with_context(|| format!("invalid target.repo_name {name:?}"))?;
        }
        Ok(())
    }

    /// Merge CLI values over this file and resolve the token.
    ///
    /// A user (from either source) takes precedence over an org.
    pub fn build_runtime_options(
        &self,
        work_dir: &Path,
        cli: CliOverrides,
    ) -> Result<RuntimeOptions> {
        let work_dir = fs::canonicalize(work_dir)
            .with_context(|| format!("failed to resolve work dir {}", work_dir.display()))?;

        let user = non_blank(cli.user).or_else(|| non_blank(self.target.user.clone()));
        let org = non_blank(cli.org).or_else(|| non_blank(self.target.org.clone()));
        let owner = match (user, org) {
            (Some(u), _) => Owner::User(u),
            (None, Some(o)) => Owner::Org(o),
            (None, None) => bail!(
                "no repository owner configured; pass --user or --org, or set target.user / target.org in {CONFIG_FILE}"
            ),
        };

        let fetch_depth = self.staging.fetch_depth;
        if fetch_depth == 0 {
            bail!("staging.fetch_depth must be greater than 0");
        }

        Ok(RuntimeOptions {
            work_dir,
            build_dir: cli.build_dir.or_else(|| self.build.dir.clone()),
            staging_dir: cli.staging_dir.unwrap_or_else(|| self.staging.dir.clone()),
            owner,
            repo_name: non_blank(cli.repo_name).or_else(|| self.target.repo_name.clone()),
            token: auth::resolve_token(cli.token.as_deref()),
            api_base: cli
                .api_base
                .unwrap_or_else(|| self.hosting.api_base.clone()),
            git_base: cli
                .git_base
                .unwrap_or_else(|| self.hosting.git_base.clone()),
            remote_name: self.staging.remote.clone(),
            create_repo: !cli.no_create_repo && self.target.create_repo,
            fetch_depth,
            api_timeout: cli.api_timeout.unwrap_or(self.hosting.timeout),
            exclude: self.build.exclude.clone(),
        })
    }

    pub fn default_toml_template() -> String {
        r#"# artship configuration file
# Place it next to the root package.json as .artship.toml

[target]
# Account that owns the artifact repositories. `user` wins when both are set.
# user = "octocat"
# org = "my-org"
# Fixed repository name (single-package repositories only).
# repo_name = "my-app-build"
# Create the repository through the hosting API before publishing.
create_repo = true

[hosting]
api_base = "https://api.github.com"
git_base = "https://github.com"
# Timeout for hosting API requests
timeout = "30s"

[staging]
# Parent directory of staging clones, relative to the work dir
dir = "tmp"
# Remote name used inside each staging clone
remote = "artifact"
# History depth fetched from an existing artifact branch
fetch_depth = 1

[build]
# Build-output directory relative to each package root.
# A package's publishConfig.directory takes precedence.
# dir = "dist"
# Extra top-level names skipped when no build directory exists
exclude = []
"#
        .to_string()
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
