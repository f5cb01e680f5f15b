//! Pull request records consumed by the harness.

use serde::{Deserialize, Serialize};

use super::{validate_git_ref, validate_repo_name};
use crate::error::DatasetError;

/// Base branch information of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    /// Branch label (`org:branch`).
    #[serde(default)]
    pub label: String,
    /// Branch name.
    #[serde(default, rename = "ref")]
    pub ref_name: String,
    /// Commit the pull request was opened against.
    pub sha: String,
}

/// An issue closed by the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIssue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

/// Immutable description of one collected pull request and its two patches.
///
/// Records are produced by the collection pipeline and only read here; every
/// field is private and exposed through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    org: String,
    repo: String,
    number: u64,
    base: Base,
    #[serde(default)]
    fix_patch: String,
    #[serde(default)]
    test_patch: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    resolved_issues: Vec<ResolvedIssue>,
}

impl PullRequest {
    /// Creates a record with the fields the harness needs.
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
        number: u64,
        base_sha: impl Into<String>,
        fix_patch: impl Into<String>,
        test_patch: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
            number,
            base: Base {
                label: String::new(),
                ref_name: String::new(),
                sha: base_sha.into(),
            },
            fix_patch: fix_patch.into(),
            test_patch: test_patch.into(),
            title: String::new(),
            body: None,
            resolved_issues: Vec::new(),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    /// Commit the source tree is checked out to before any patch is applied.
    pub fn base_sha(&self) -> &str {
        &self.base.sha
    }

    pub fn fix_patch(&self) -> &str {
        &self.fix_patch
    }

    pub fn test_patch(&self) -> &str {
        &self.test_patch
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn resolved_issues(&self) -> &[ResolvedIssue] {
        &self.resolved_issues
    }

    /// `org/repo`.
    pub fn full_repo(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Stable identifier, `org__repo-<number>`.
    pub fn id(&self) -> String {
        format!("{}__{}-{}", self.org, self.repo, self.number)
    }

    /// Rejects records whose names or refs are unsafe to interpolate into
    /// shell scripts and Dockerfiles.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let invalid = |reason: String| DatasetError::InvalidRecord {
            id: self.id(),
            reason,
        };
        validate_repo_name(&self.full_repo()).map_err(|e| invalid(e.to_string()))?;
        validate_git_ref(&self.base.sha).map_err(|e| invalid(format!("base sha: {e}")))?;
        Ok(())
    }
}
