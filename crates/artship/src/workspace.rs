//! Discovery of publishable units from `package.json`.
//!
//! A repository whose root manifest declares `workspaces` yields one unit per
//! matching member directory. Anything else is a single unit at the root.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::stager::MANIFEST_FILE;
use crate::types::{PackageDescriptor, SourceUnit};

pub fn load_descriptor(path: &Path) -> Result<PackageDescriptor> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read package manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse package manifest {}", path.display()))
}

pub fn unit_at(root: &Path) -> Result<SourceUnit> {
    let root = fs::canonicalize(root)
        .with_context(|| format!("failed to resolve {}", root.display()))?;
    let manifest_path = root.join(MANIFEST_FILE);
    let descriptor = load_descriptor(&manifest_path)?;
    let base = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("{} has no directory name", root.display()))?;
    Ok(SourceUnit {
        root,
        base,
        manifest_path,
        descriptor,
    })
}

/// Every unit under `work_dir`, sorted by path.
pub fn discover_units(work_dir: &Path) -> Result<Vec<SourceUnit>> {
    let root = unit_at(work_dir)?;
    let patterns = root.descriptor.workspace_patterns().to_vec();
    if patterns.is_empty() {
        return Ok(vec![root]);
    }

    let dirs = member_dirs(&root.root, &patterns)?;
    if dirs.is_empty() {
        bail!(
            "workspace patterns {:?} in {} matched no package directories",
            patterns,
            root.manifest_path.display()
        );
    }

    let units = dirs
        .iter()
        .map(|d| unit_at(d))
        .collect::<Result<Vec<_>>>()?;
    check_unique_bases(&units)?;
    Ok(units)
}

/// Directories matched by the patterns that hold a manifest. Patterns
/// starting with `!` remove matches.
fn member_dirs(root: &Path, patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for raw in patterns {
        let (negated, pattern) = match raw.strip_prefix('!') {
            Some(p) => (true, p),
            None => (false, raw.as_str()),
        };
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let full = root.join(pattern);
        let full = full.to_string_lossy();
        let entries =
            glob::glob(&full).with_context(|| format!("invalid workspace pattern {raw:?}"))?;
        for entry in entries {
            let path = entry.with_context(|| format!("failed to expand {raw:?}"))?;
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            if path.components().any(|c| c.as_os_str() == "node_modules") {
                continue;
            }
            if negated {
                excluded.insert(path);
            } else {
                included.insert(path);
            }
        }
    }

    Ok(included.difference(&excluded).cloned().collect())
}

fn check_unique_bases(units: &[SourceUnit]) -> Result<()> {
    let mut seen: BTreeMap<&str, &Path> = BTreeMap::new();
    for unit in units {
        if let Some(other) = seen.insert(&unit.base, &unit.root) {
            bail!(
                "units {} and {} share the directory name {:?}; staging paths would collide",
                other.display(),
                unit.root.display(),
                unit.base
            );
        }
    }
    Ok(())
}
