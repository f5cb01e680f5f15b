//! Repository adapters and their registry.
//!
//! An [`Instance`] binds one pull request to the image chain, run commands
//! and log grammar of its repository. Adapters are looked up by
//! `(org, repo)` in an [`InstanceRegistry`] that the caller builds once and
//! hands to the harness; there is no global registration.

use std::collections::HashMap;

use tracing::debug;

use crate::config::Config;
use crate::dataset::PullRequest;
use crate::error::RegistryError;
use crate::image::{Image, PrImage, Toolchain};
use crate::verdict::{LogGrammar, TestResult};

pub mod golang;
pub mod java;
pub mod rust;

/// Baseline command.
pub const RUN_CMD: &str = "bash /home/run.sh";
/// Test-patch phase command.
pub const TEST_PATCH_RUN_CMD: &str = "bash /home/test-run.sh";
/// Fix phase command.
pub const FIX_PATCH_RUN_CMD: &str = "bash /home/fix-run.sh";

/// Execution adapter for one pull request.
pub trait Instance: Send + Sync {
    fn pr(&self) -> &PullRequest;

    /// Terminal layer of the image chain the phases run in.
    fn dependency(&self) -> Box<dyn Image>;

    /// Baseline command; `cmd` replaces the default when given.
    fn run(&self, cmd: Option<&str>) -> String {
        cmd.unwrap_or(RUN_CMD).to_string()
    }

    fn test_patch_run(&self, cmd: Option<&str>) -> String {
        cmd.unwrap_or(TEST_PATCH_RUN_CMD).to_string()
    }

    fn fix_patch_run(&self, cmd: Option<&str>) -> String {
        cmd.unwrap_or(FIX_PATCH_RUN_CMD).to_string()
    }

    /// Reduces the raw output of any phase to a verdict.
    fn parse_log(&self, log: &str) -> TestResult;
}

/// Adapter whose behavior is entirely described by a [`Toolchain`].
#[derive(Debug, Clone)]
pub struct RepoInstance {
    pr: PullRequest,
    config: Config,
    toolchain: &'static Toolchain,
}

impl RepoInstance {
    pub fn new(pr: PullRequest, config: Config, toolchain: &'static Toolchain) -> Self {
        Self {
            pr,
            config,
            toolchain,
        }
    }
}

impl Instance for RepoInstance {
    fn pr(&self) -> &PullRequest {
        &self.pr
    }

    fn dependency(&self) -> Box<dyn Image> {
        Box::new(PrImage::new(
            self.pr.clone(),
            self.config.clone(),
            self.toolchain,
        ))
    }

    fn parse_log(&self, log: &str) -> TestResult {
        self.toolchain.grammar.parse(log)
    }
}

/// Constructor stored in the registry.
pub type InstanceFactory = fn(PullRequest, Config) -> Box<dyn Instance>;

/// One registered repository.
#[derive(Clone)]
pub struct RegistryEntry {
    pub org: String,
    pub repo: String,
    pub toolchain: &'static Toolchain,
    factory: InstanceFactory,
}

impl RegistryEntry {
    pub fn new(
        org: impl Into<String>,
        repo: impl Into<String>,
        toolchain: &'static Toolchain,
        factory: InstanceFactory,
    ) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
            toolchain,
            factory,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    pub fn language(&self) -> &'static str {
        self.toolchain.language
    }

    pub fn grammar(&self) -> LogGrammar {
        self.toolchain.grammar
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("org", &self.org)
            .field("repo", &self.repo)
            .field("language", &self.toolchain.language)
            .finish()
    }
}

/// Append-only map from `(org, repo)` to adapter constructors. Keys are
/// case-sensitive.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: HashMap<(String, String), RegistryEntry>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        golang::register(&mut registry)?;
        java::register(&mut registry)?;
        rust::register(&mut registry)?;
        Ok(registry)
    }

    /// Adds an adapter. Registering the same `(org, repo)` twice fails.
    pub fn register(&mut self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let key = (entry.org.clone(), entry.repo.clone());
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateInstance {
                org: entry.org,
                repo: entry.repo,
            });
        }
        debug!(instance = %entry.full_name(), language = entry.language(), "Registered instance");
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn entry(&self, org: &str, repo: &str) -> Result<&RegistryEntry, RegistryError> {
        self.entries
            .get(&(org.to_string(), repo.to_string()))
            .ok_or_else(|| RegistryError::NotRegistered {
                org: org.to_string(),
                repo: repo.to_string(),
            })
    }

    /// Builds the adapter for `pr`.
    pub fn create(&self, pr: &PullRequest, config: &Config) -> Result<Box<dyn Instance>, RegistryError> {
        let entry = self.entry(pr.org(), pr.repo())?;
        Ok((entry.factory)(pr.clone(), config.clone()))
    }

    /// All entries, sorted by `org/repo`.
    pub fn entries(&self) -> Vec<&RegistryEntry> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| (&a.org, &a.repo).cmp(&(&b.org, &b.repo)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{resolve_chain, scripts, MAX_CHAIN_DEPTH};

    fn pr_for(entry: &RegistryEntry) -> PullRequest {
        PullRequest::new(entry.org.clone(), entry.repo.clone(), 1, "abc123", "fix", "test")
    }

    #[test]
    fn test_every_builtin_chain_terminates() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        assert_eq!(registry.len(), 3);

        for entry in registry.entries() {
            for need_clone in [true, false] {
                let instance = registry.create(&pr_for(entry), &Config::new(need_clone)).unwrap();
                let chain = resolve_chain(instance.dependency()).unwrap();
                assert!(chain.layers.len() <= MAX_CHAIN_DEPTH);
                assert_eq!(chain.layers.len(), 2, "{}", entry.full_name());
                assert_eq!(chain.external, entry.toolchain.base_image);
                assert_eq!(chain.layers[0].image_tag(), "base");
                assert_eq!(chain.layers[1].image_tag(), "pr-1");
            }
        }
    }

    #[test]
    fn test_every_builtin_applies_test_patch_first() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        for entry in registry.entries() {
            let instance = registry.create(&pr_for(entry), &Config::new(true)).unwrap();
            let files = instance.dependency().files();
            let fix_run = files
                .iter()
                .find(|f| f.name == scripts::FIX_RUN_SCRIPT)
                .unwrap();
            assert!(
                scripts::check_patch_order("test", &fix_run.content, &["/home/test.patch", "/home/fix.patch"])
                    .is_ok(),
                "{}",
                entry.full_name()
            );
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = InstanceRegistry::with_builtin().unwrap();
        let err = golang::register(&mut registry).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateInstance { .. }));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unregistered_lookup_fails() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        let pr = PullRequest::new("octo", "cat", 1, "abc", "", "");
        let err = registry.create(&pr, &Config::new(true)).err().unwrap();
        assert!(matches!(err, RegistryError::NotRegistered { .. }));

        // Keys are case-sensitive.
        assert!(registry.entry("Gin-Gonic", "gin").is_err());
        assert!(registry.entry("gin-gonic", "gin").is_ok());
    }

    #[test]
    fn test_default_and_overridden_commands() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        let pr = PullRequest::new("gin-gonic", "gin", 4242, "abc", "", "");
        let instance = registry.create(&pr, &Config::new(true)).unwrap();

        assert_eq!(instance.run(None), "bash /home/run.sh");
        assert_eq!(instance.test_patch_run(None), "bash /home/test-run.sh");
        assert_eq!(instance.fix_patch_run(None), "bash /home/fix-run.sh");
        assert_eq!(
            instance.fix_patch_run(Some("bash /home/fix-run.sh -run TestX")),
            "bash /home/fix-run.sh -run TestX"
        );
        assert_eq!(instance.pr().number(), 4242);
    }

    #[test]
    fn test_instance_uses_toolchain_grammar() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        let pr = PullRequest::new("gin-gonic", "gin", 1, "abc", "", "");
        let instance = registry.create(&pr, &Config::new(true)).unwrap();

        let result = instance.parse_log("--- PASS: TestA\n--- FAIL: TestB\nFAIL\tpkg/foo 0.01s\n");
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 2);
        assert_eq!(result.skipped_count(), 0);
    }

    #[test]
    fn test_entries_sorted() {
        let registry = InstanceRegistry::with_builtin().unwrap();
        let names: Vec<String> = registry.entries().iter().map(|e| e.full_name()).collect();
        assert_eq!(
            names,
            vec!["BurntSushi/ripgrep", "apache/dubbo", "gin-gonic/gin"]
        );
    }
}
