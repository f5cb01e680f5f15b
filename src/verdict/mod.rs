//! Log-to-verdict reduction.
//!
//! Raw test-runner output is reduced to a [`TestResult`]: three pairwise
//! disjoint sets of test identifiers. Every grammar funnels its raw
//! classifications through [`VerdictBuilder`], which applies the precedence
//! rule failed > passed > skipped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub mod certify;
pub mod grammar;

pub use certify::{certify, Certification};
pub use grammar::LogGrammar;

/// Prefix of identifiers for package-level aggregate failures.
pub const PACKAGE_PREFIX: &str = "pkg::";

/// Normalized outcome of one test phase.
///
/// The three sets are pairwise disjoint and each count equals the size of its
/// set. The only ways to obtain a value are [`VerdictBuilder::finish`],
/// [`TestResult::from_sets`] and deserialization, all of which normalize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTestResult")]
pub struct TestResult {
    passed_count: usize,
    failed_count: usize,
    skipped_count: usize,
    passed_tests: BTreeSet<String>,
    failed_tests: BTreeSet<String>,
    skipped_tests: BTreeSet<String>,
}

impl TestResult {
    /// Builds a result from possibly overlapping sets.
    pub fn from_sets(
        passed: impl IntoIterator<Item = String>,
        failed: impl IntoIterator<Item = String>,
        skipped: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut passed: BTreeSet<String> = passed.into_iter().collect();
        let failed: BTreeSet<String> = failed.into_iter().collect();
        let mut skipped: BTreeSet<String> = skipped.into_iter().collect();

        // Order matters: failed wins over both, then passed over skipped.
        passed.retain(|t| !failed.contains(t));
        skipped.retain(|t| !failed.contains(t));
        skipped.retain(|t| !passed.contains(t));

        Self {
            passed_count: passed.len(),
            failed_count: failed.len(),
            skipped_count: skipped.len(),
            passed_tests: passed,
            failed_tests: failed,
            skipped_tests: skipped,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.passed_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped_count
    }

    pub fn passed_tests(&self) -> &BTreeSet<String> {
        &self.passed_tests
    }

    pub fn failed_tests(&self) -> &BTreeSet<String> {
        &self.failed_tests
    }

    pub fn skipped_tests(&self) -> &BTreeSet<String> {
        &self.skipped_tests
    }

    /// Total number of classified identifiers.
    pub fn total(&self) -> usize {
        self.passed_count + self.failed_count + self.skipped_count
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Wire form accepted on deserialization; counts are recomputed from sets.
#[derive(Deserialize)]
struct RawTestResult {
    #[serde(default)]
    passed_tests: BTreeSet<String>,
    #[serde(default)]
    failed_tests: BTreeSet<String>,
    #[serde(default)]
    skipped_tests: BTreeSet<String>,
}

impl From<RawTestResult> for TestResult {
    fn from(raw: RawTestResult) -> Self {
        TestResult::from_sets(raw.passed_tests, raw.failed_tests, raw.skipped_tests)
    }
}

/// Accumulates raw classifications while a grammar walks a log.
#[derive(Debug, Default)]
pub struct VerdictBuilder {
    passed: BTreeSet<String>,
    failed: BTreeSet<String>,
    skipped: BTreeSet<String>,
}

impl VerdictBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, id: impl Into<String>) {
        self.passed.insert(id.into());
    }

    pub fn fail(&mut self, id: impl Into<String>) {
        self.failed.insert(id.into());
    }

    pub fn skip(&mut self, id: impl Into<String>) {
        self.skipped.insert(id.into());
    }

    /// Records an aggregate failure of a whole package under `pkg::<path>`.
    pub fn fail_package(&mut self, path: &str) {
        self.failed.insert(format!("{PACKAGE_PREFIX}{path}"));
    }

    /// Records a package whose tests all passed under `pkg::<path>`.
    pub fn pass_package(&mut self, path: &str) {
        self.passed.insert(format!("{PACKAGE_PREFIX}{path}"));
    }

    pub fn finish(self) -> TestResult {
        TestResult::from_sets(self.passed, self.failed, self.skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_invariants(result: &TestResult) {
        assert!(result.passed_tests().is_disjoint(result.failed_tests()));
        assert!(result.passed_tests().is_disjoint(result.skipped_tests()));
        assert!(result.failed_tests().is_disjoint(result.skipped_tests()));
        assert_eq!(result.passed_count(), result.passed_tests().len());
        assert_eq!(result.failed_count(), result.failed_tests().len());
        assert_eq!(result.skipped_count(), result.skipped_tests().len());
    }

    #[test]
    fn test_failed_wins_over_passed_and_skipped() {
        let result = TestResult::from_sets(
            ids(&["A", "B", "C"]),
            ids(&["B", "D"]),
            ids(&["C", "D", "E"]),
        );
        assert_invariants(&result);
        assert_eq!(result.passed_tests(), &ids(&["A"]).into_iter().collect());
        assert_eq!(result.failed_tests(), &ids(&["B", "D"]).into_iter().collect());
        assert_eq!(result.skipped_tests(), &ids(&["E"]).into_iter().collect());
        assert_eq!(result.total(), 4);
    }

    #[test]
    fn test_builder_precedence_law() {
        let mut builder = VerdictBuilder::new();
        builder.pass("TestX");
        builder.skip("TestX");
        builder.fail("TestX");
        let result = builder.finish();
        assert_invariants(&result);
        assert!(result.failed_tests().contains("TestX"));
        assert!(result.passed_tests().is_empty());
        assert!(result.skipped_tests().is_empty());
    }

    #[test]
    fn test_package_namespace() {
        let mut builder = VerdictBuilder::new();
        builder.pass("pkg/foo");
        builder.fail_package("pkg/foo");
        builder.pass_package("pkg/bar");
        let result = builder.finish();
        assert!(result.passed_tests().contains("pkg/foo"));
        assert!(result.passed_tests().contains("pkg::pkg/bar"));
        assert!(result.failed_tests().contains("pkg::pkg/foo"));
    }

    #[test]
    fn test_deserialize_normalizes() {
        let json = r#"{
            "passed_count": 99,
            "failed_count": 0,
            "skipped_count": 0,
            "passed_tests": ["A", "B"],
            "failed_tests": ["B"],
            "skipped_tests": []
        }"#;
        let result: TestResult = serde_json::from_str(json).unwrap();
        assert_invariants(&result);
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn test_serialize_shape() {
        let result = TestResult::from_sets(ids(&["A"]), ids(&[]), ids(&["S"]));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["passed_count"], 1);
        assert_eq!(json["skipped_tests"][0], "S");
        assert!(TestResult::default().is_empty());
    }
}
