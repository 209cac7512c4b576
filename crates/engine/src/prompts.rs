// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt templates for agent attempts.
//!
//! The template is picked by `(is_initial_build, attempt, has_files)`;
//! retries get progressively more directive so a flaky attempt chain still
//! converges on something deployable. A bounded one-line summary of the
//! prior attempt's failure is prepended when the error is recognizable.

use std::fmt;

/// Longest previous-error context line we will ever prepend.
pub const ERROR_CONTEXT_MAX: usize = 240;

/// Files listed in a resume prompt before truncation.
const MAX_LISTED_FILES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// First attempt of a project's first build.
    InitialBuild,
    /// Work already exists on disk; continue rather than restart.
    ResumeWithFiles,
    /// Second attempt with an empty directory: bias for speed.
    SpeedMode,
    /// Last-ditch attempt: produce the smallest thing that works.
    BareMinimum,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::InitialBuild => write!(f, "initial-build"),
            PromptKind::ResumeWithFiles => write!(f, "resume-with-files"),
            PromptKind::SpeedMode => write!(f, "speed-mode"),
            PromptKind::BareMinimum => write!(f, "bare-minimum"),
        }
    }
}

/// Template selection.
///
/// Existing files always win (resume); an empty directory escalates from
/// speed mode to bare minimum as attempts burn down.
pub fn select(is_initial_build: bool, attempt: u32, has_files: bool) -> PromptKind {
    if attempt <= 1 {
        if is_initial_build {
            return PromptKind::InitialBuild;
        }
        return PromptKind::ResumeWithFiles;
    }
    if has_files {
        return PromptKind::ResumeWithFiles;
    }
    if attempt == 2 {
        PromptKind::SpeedMode
    } else {
        PromptKind::BareMinimum
    }
}

/// One-line "previous error context" header for recognizable failures.
///
/// Unrecognizable errors still produce a line, truncated hard so prompt
/// budgets stay predictable.
pub fn error_context_line(prev_error: &str) -> Option<String> {
    let trimmed = prev_error.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    let summary = if lower.contains("package.json") {
        "the project is missing a valid package.json"
    } else if lower.contains("cannot find module") || lower.contains("unresolved module") {
        "an import referenced a module that does not exist"
    } else if lower.contains("eacces") || lower.contains("permission denied") {
        "a file operation hit a permissions error"
    } else if lower.contains("enospc") {
        "the disk filled up"
    } else if lower.contains("timed out") || lower.contains("deadline") {
        "the previous attempt ran out of time"
    } else {
        trimmed
    };

    let mut line = format!("Previous attempt failed: {summary}.");
    if line.len() > ERROR_CONTEXT_MAX {
        let mut cut = ERROR_CONTEXT_MAX;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        line.truncate(cut);
    }
    Some(line)
}

/// Assemble the full prompt for an attempt.
pub fn render(
    kind: PromptKind,
    user_prompt: &str,
    files: &[String],
    prev_error: Option<&str>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(error) = prev_error.and_then(error_context_line) {
        sections.push(error);
    }

    sections.push(match kind {
        PromptKind::InitialBuild => {
            "Build a complete, working web application for the request below. \
             Create every file the app needs, including package.json when \
             dependencies are required, and finish with a deployable project."
                .to_string()
        }
        PromptKind::ResumeWithFiles => {
            "Continue working on the existing project in this directory. Keep \
             what already works; fix or finish what does not. Do not start over."
                .to_string()
        }
        PromptKind::SpeedMode => {
            "The previous attempt produced nothing usable. Rebuild quickly: \
             favor plain, dependency-light implementations that are certain to \
             run over elaborate ones."
                .to_string()
        }
        PromptKind::BareMinimum => {
            "Produce the smallest working version of the request: a single \
             page or entry point that loads without errors. Nothing optional."
                .to_string()
        }
    });

    if kind == PromptKind::ResumeWithFiles && !files.is_empty() {
        let mut listed: Vec<&str> = files.iter().take(MAX_LISTED_FILES).map(|f| f.as_str()).collect();
        listed.sort_unstable();
        let mut section = format!("Files already present:\n{}", listed.join("\n"));
        if files.len() > MAX_LISTED_FILES {
            section.push_str(&format!("\n… and {} more", files.len() - MAX_LISTED_FILES));
        }
        sections.push(section);
    }

    sections.push(format!("Request:\n{user_prompt}"));
    sections.join("\n\n")
}

#[cfg(test)]
#[path = "prompts_tests.rs"]
mod tests;
