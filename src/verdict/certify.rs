//! Fix certification across the three test phases.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::TestResult;

/// Outcome of comparing baseline, test-patch and fix-patch verdicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    /// Tests broken by the test patch (and not already failing at baseline)
    /// that pass once the fix is applied.
    pub fail_to_pass: BTreeSet<String>,
    /// Tests passing before the fix that still pass with it.
    pub pass_to_pass: BTreeSet<String>,
    /// Tests broken by the test patch that the fix does not make pass.
    pub unresolved: BTreeSet<String>,
    /// Tests passing at baseline or with the test patch that fail with the fix.
    pub regressions: BTreeSet<String>,
    /// Whether the fix patch resolves the issue without regressions.
    pub valid: bool,
}

/// Certifies a fix from the three phase verdicts.
///
/// The fix is valid iff every test that fails with the test patch but not at
/// baseline passes with the fix, and no test that passed in either earlier
/// phase fails with the fix.
pub fn certify(run: &TestResult, test_patch: &TestResult, fix_patch: &TestResult) -> Certification {
    let targets: BTreeSet<&String> = test_patch
        .failed_tests()
        .iter()
        .filter(|t| !run.failed_tests().contains(*t))
        .collect();

    let (fixed, unresolved): (BTreeSet<String>, BTreeSet<String>) = targets
        .into_iter()
        .cloned()
        .partition(|t| fix_patch.passed_tests().contains(t));

    let previously_passing: BTreeSet<&String> = run
        .passed_tests()
        .iter()
        .chain(test_patch.passed_tests().iter())
        .collect();

    let regressions: BTreeSet<String> = previously_passing
        .iter()
        .filter(|t| fix_patch.failed_tests().contains(**t))
        .map(|t| (*t).clone())
        .collect();

    let pass_to_pass: BTreeSet<String> = previously_passing
        .iter()
        .filter(|t| fix_patch.passed_tests().contains(**t) && !fixed.contains(**t))
        .map(|t| (*t).clone())
        .collect();

    let valid = unresolved.is_empty() && regressions.is_empty();

    Certification {
        fail_to_pass: fixed,
        pass_to_pass,
        unresolved,
        regressions,
        valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passed: &[&str], failed: &[&str]) -> TestResult {
        TestResult::from_sets(
            passed.iter().map(|s| s.to_string()),
            failed.iter().map(|s| s.to_string()),
            Vec::new(),
        )
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_fix() {
        let run = result(&["T0"], &[]);
        let test = result(&["T0"], &["T1", "T2"]);
        let fix = result(&["T0", "T1", "T2", "T3"], &[]);

        let cert = certify(&run, &test, &fix);
        assert!(cert.valid);
        assert_eq!(cert.fail_to_pass, set(&["T1", "T2"]));
        assert_eq!(cert.pass_to_pass, set(&["T0"]));
        assert!(cert.unresolved.is_empty());
        assert!(cert.regressions.is_empty());
    }

    #[test]
    fn test_fix_still_failing_target() {
        let run = result(&[], &[]);
        let test = result(&[], &["T1", "T2"]);
        let fix = result(&["T1", "T3"], &["T2"]);

        let cert = certify(&run, &test, &fix);
        assert!(!cert.valid);
        assert_eq!(cert.fail_to_pass, set(&["T1"]));
        assert_eq!(cert.unresolved, set(&["T2"]));
    }

    #[test]
    fn test_target_missing_from_fix_log_is_unresolved() {
        let run = result(&[], &[]);
        let test = result(&[], &["T1"]);
        let fix = result(&[], &[]);

        let cert = certify(&run, &test, &fix);
        assert!(!cert.valid);
        assert_eq!(cert.unresolved, set(&["T1"]));
    }

    #[test]
    fn test_regression_invalidates_fix() {
        let run = result(&["Stable"], &[]);
        let test = result(&["Other"], &["T1"]);
        let fix = result(&["T1"], &["Stable", "Other"]);

        let cert = certify(&run, &test, &fix);
        assert!(!cert.valid);
        assert_eq!(cert.regressions, set(&["Other", "Stable"]));
        assert!(cert.unresolved.is_empty());
    }

    #[test]
    fn test_baseline_failures_are_not_targets() {
        let run = result(&[], &["Broken"]);
        let test = result(&[], &["Broken", "T1"]);
        let fix = result(&["T1"], &["Broken"]);

        let cert = certify(&run, &test, &fix);
        assert!(cert.valid);
        assert_eq!(cert.fail_to_pass, set(&["T1"]));
    }
}
