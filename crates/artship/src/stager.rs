use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::CommitDescriptor;
use crate::engine::Reporter;
use crate::types::{RuntimeOptions, SourceUnit};

pub const BUILD_INFO_FILE: &str = "BUILD_INFO";
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Contents of the build directory plus the package manifest.
    BuildOutput,
    /// The unit root minus excluded entries.
    FullTree,
}

/// Provenance record written at the root of every artifact commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub url: Option<String>,
}

impl BuildInfo {
    pub fn new(desc: &CommitDescriptor, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            hash: desc.hash.clone(),
            url: desc.url.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{}\n{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.hash
        );
        if let Some(url) = &self.url {
            out.push_str(url);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(BUILD_INFO_FILE);
        fs::write(&path, self.render())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Top-level names skipped in full-tree mode. A name is skipped when it
/// contains any pattern as a substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionFilter {
    patterns: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(staging_dir: &Path, extra: &[String]) -> Self {
        let mut patterns = Vec::new();
        if let Some(first) = staging_dir
            .components()
            .find_map(|c| match c {
                std::path::Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .filter(|_| staging_dir.is_relative())
        {
            patterns.push(first);
        }
        patterns.push(".git".to_string());
        patterns.push("node_modules".to_string());
        patterns.extend(extra.iter().filter(|p| !p.is_empty()).cloned());
        Self { patterns }
    }

    pub fn from_options(opts: &RuntimeOptions) -> Self {
        Self::new(&opts.staging_dir, &opts.exclude)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

/// `publishConfig.directory` when declared, else the configured build dir;
/// both relative to the unit root.
pub fn resolve_build_dir(unit: &SourceUnit, opts: &RuntimeOptions) -> Option<PathBuf> {
    unit.descriptor
        .declared_build_dir()
        .map(PathBuf::from)
        .or_else(|| opts.build_dir.clone())
        .map(|d| unit.root.join(d))
}

pub struct StageRequest<'a> {
    pub unit: &'a SourceUnit,
    pub staging: &'a Path,
    pub build_dir: Option<&'a Path>,
    pub filter: &'a ExclusionFilter,
    pub build_info: &'a BuildInfo,
}

/// Copies the artifact tree into the (already cleared) staging worktree and
/// writes `BUILD_INFO`.
pub fn stage_artifacts(req: &StageRequest<'_>, reporter: &mut dyn Reporter) -> Result<StageMode> {
    let mode = match req.build_dir.filter(|d| d.is_dir()) {
        Some(build_dir) => {
            let copied = copy_dir_contents(build_dir, req.staging, req.staging)?;
            reporter.info(&format!(
                "copied {copied} file(s) from {}",
                build_dir.display()
            ));
            if req.unit.manifest_path.is_file() {
                let dest = req.staging.join(MANIFEST_FILE);
                fs::copy(&req.unit.manifest_path, &dest).with_context(|| {
                    format!("failed to copy {}", req.unit.manifest_path.display())
                })?;
            } else {
                reporter.debug("no package manifest to copy");
            }
            StageMode::BuildOutput
        }
        None => {
            if let Some(d) = req.build_dir {
                reporter.info(&format!(
                    "build directory {} not found; staging the source tree",
                    d.display()
                ));
            }
            let copied = copy_filtered_tree(&req.unit.root, req.staging, req.filter, reporter)?;
            reporter.info(&format!(
                "copied {copied} file(s) from {}",
                req.unit.root.display()
            ));
            StageMode::FullTree
        }
    };

    req.build_info.write(req.staging)?;
    Ok(mode)
}

fn copy_filtered_tree(
    root: &Path,
    staging: &Path,
    filter: &ExclusionFilter,
    reporter: &mut dyn Reporter,
) -> Result<u64> {
    let mut entries: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("failed to read {}", root.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut copied = 0;
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let src = entry.path();
        if filter.is_excluded(&name) {
            reporter.debug(&format!("excluding {name}"));
            continue;
        }
        if staging.starts_with(&src) {
            reporter.debug(&format!("skipping {name}; it contains the staging directory"));
            continue;
        }
        copied += copy_entry(&src, &staging.join(&name), staging)?;
    }
    Ok(copied)
}

/// Copies the entries of `src` into `dst`, leaving out `.git` and anything
/// that holds the staging clone.
fn copy_dir_contents(src: &Path, dst: &Path, staging: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name() == ".git" || staging.starts_with(&path) {
            continue;
        }
        copied += copy_entry(&path, &dst.join(entry.file_name()), staging)?;
    }
    Ok(copied)
}

/// Recursive copy that keeps symlinks as links; returns the number of
/// entries written.
fn copy_entry(src: &Path, dst: &Path, staging: &Path) -> Result<u64> {
    let meta =
        fs::symlink_metadata(src).with_context(|| format!("failed to stat {}", src.display()))?;
    if meta.file_type().is_symlink() {
        copy_symlink(src, dst)
    } else if meta.is_dir() {
        fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
        copy_dir_contents(src, dst, staging)
    } else {
        fs::copy(src, dst).with_context(|| {
            format!("failed to copy {} to {}", src.display(), dst.display())
        })?;
        Ok(1)
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<u64> {
    let target =
        fs::read_link(src).with_context(|| format!("failed to read link {}", src.display()))?;
    std::os::unix::fs::symlink(&target, dst)
        .with_context(|| format!("failed to link {} to {}", dst.display(), target.display()))?;
    Ok(1)
}

/// Without native links, resolvable files are copied and anything else is
/// left out.
#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<u64> {
    if !src.is_file() {
        return Ok(0);
    }
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(1)
}
