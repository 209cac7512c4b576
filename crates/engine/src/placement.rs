// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File placement validation after an agent run.
//!
//! Agents occasionally write project files one level above their working
//! directory. Project-class files found outside the project directory are
//! moved in; anything matching a system/worker pattern is never moved and
//! is recorded as a security event instead.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Names that must never be relocated, whatever claims to own them.
const SYSTEM_PATTERNS: &[&str] = &["worker", "daemon", ".ssh", "id_rsa", "authorized_keys"];

/// Exact file names the pipeline considers project-class.
const PROJECT_FILE_NAMES: &[&str] = &[
    "package.json",
    "index.html",
    "README.md",
    "recommendations.json",
    "project-info.md",
    "deploy-intent.json",
    "vite.config.js",
    "vite.config.ts",
    "next.config.js",
    "next.config.mjs",
];

/// Extensions that mark a stray file as project-class.
const PROJECT_EXTENSIONS: &[&str] = &["html", "css", "js", "jsx", "ts", "tsx", "md", "svelte", "vue"];

/// Outcome of one placement sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    /// Strays moved into the project directory.
    pub moved: Vec<PathBuf>,
    /// System-pattern files left exactly where they were.
    pub flagged: Vec<PathBuf>,
}

fn matches_system_pattern(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with(".env") || SYSTEM_PATTERNS.iter().any(|p| lower.contains(p))
}

fn is_project_class(name: &str) -> bool {
    if PROJECT_FILE_NAMES.contains(&name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| PROJECT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sweep `base_dir` for project-class files that landed outside
/// `project_dir`, moving them in. Files matching system/worker patterns are
/// flagged but never touched.
pub fn sweep_strays(base_dir: &Path, project_dir: &Path) -> std::io::Result<PlacementReport> {
    let mut report = PlacementReport::default();
    if !base_dir.exists() {
        return Ok(report);
    }

    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path == project_dir {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        if matches_system_pattern(&name) {
            if is_project_class(&name) || entry.file_type()?.is_file() {
                warn!(path = %path.display(), "system-pattern file outside project dir, not moving");
                report.flagged.push(path);
            }
            continue;
        }

        if !entry.file_type()?.is_file() || !is_project_class(&name) {
            continue;
        }

        let target = project_dir.join(&name);
        if target.exists() {
            // The project's own copy wins; leave the stray for inspection
            warn!(path = %path.display(), "stray duplicates a project file, leaving in place");
            continue;
        }
        std::fs::rename(&path, &target)?;
        report.moved.push(target);
    }

    Ok(report)
}

#[cfg(test)]
#[path = "placement_tests.rs"]
mod tests;
