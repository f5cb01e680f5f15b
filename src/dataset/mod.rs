//! Pull request datasets.
//!
//! Records arrive as multi-swe-bench style JSONL produced by the collection
//! pipeline. This module loads them and validates the parts that end up
//! interpolated into Dockerfiles and shell scripts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::DatasetError;

pub mod pull_request;

pub use pull_request::{Base, PullRequest, ResolvedIssue};

/// Validate a git ref (commit SHA, branch name) to prevent shell injection.
///
/// Accepts hex-only SHAs (short or full) and standard git ref names
/// (alphanumeric, `/`, `.`, `-`, `_`). Rejects shell metacharacters,
/// `..` sequences, and refs starting with `-` (flag injection).
pub fn validate_git_ref(s: &str) -> Result<(), anyhow::Error> {
    if s.is_empty() {
        anyhow::bail!("git ref is empty");
    }
    if s.len() > 256 {
        anyhow::bail!("git ref too long ({} chars, max 256)", s.len());
    }
    if s.starts_with('-') {
        anyhow::bail!(
            "git ref '{}' must not start with '-' (could be interpreted as a flag)",
            s
        );
    }
    if s.contains("..") {
        anyhow::bail!("git ref '{}' must not contain '..'", s);
    }
    for ch in s.chars() {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '.' | '-' | '_') {
            anyhow::bail!(
                "invalid character '{}' in git ref '{}': only alphanumeric, /, ., -, _ allowed",
                ch,
                s
            );
        }
    }
    Ok(())
}

/// Validate a GitHub repository name (`owner/repo`).
///
/// Both parts may contain only alphanumeric characters, hyphens, underscores,
/// and dots, and must not start with `.` or `-`.
pub fn validate_repo_name(s: &str) -> Result<(), anyhow::Error> {
    if s.is_empty() {
        anyhow::bail!("repository name is empty");
    }
    if s.len() > 256 {
        anyhow::bail!("repository name too long ({} chars, max 256)", s.len());
    }
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 2 {
        anyhow::bail!(
            "invalid repository name '{}': expected 'owner/repo' format",
            s
        );
    }
    for part in &parts {
        if part.is_empty() {
            anyhow::bail!(
                "invalid repository name '{}': owner and repo must be non-empty",
                s
            );
        }
        if part.starts_with('.') || part.starts_with('-') {
            anyhow::bail!(
                "invalid repository name '{}': parts must not start with '.' or '-'",
                s
            );
        }
        for ch in part.chars() {
            if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.') {
                anyhow::bail!(
                    "invalid character '{}' in repository name '{}': only alphanumeric, -, _, . allowed",
                    ch,
                    s
                );
            }
        }
    }
    Ok(())
}

/// Load every pull request from one JSONL file. Blank lines are skipped.
pub fn load_jsonl(path: &Path) -> Result<Vec<PullRequest>, DatasetError> {
    let content = fs::read_to_string(path)?;
    let mut prs = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pr: PullRequest = serde_json::from_str(line).map_err(|source| DatasetError::Parse {
            path: path.display().to_string(),
            line: idx + 1,
            source,
        })?;
        pr.validate()?;
        prs.push(pr);
    }
    debug!(path = %path.display(), count = prs.len(), "Loaded pull requests");
    Ok(prs)
}

/// Discover `*.jsonl` files under a directory, sorted by path.
pub fn discover_datasets(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|x| x == "jsonl").unwrap_or(false))
        .collect();
    paths.sort();
    paths
}

/// Load pull requests from a JSONL file or from every JSONL file in a directory.
pub fn load_dataset(path: &Path) -> Result<Vec<PullRequest>, DatasetError> {
    if path.is_file() {
        return load_jsonl(path);
    }
    if path.is_dir() {
        let mut all = Vec::new();
        for file in discover_datasets(path) {
            all.extend(load_jsonl(&file)?);
        }
        return Ok(all);
    }
    Err(DatasetError::UnsupportedPath(path.display().to_string()))
}
