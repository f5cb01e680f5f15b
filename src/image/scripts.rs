//! Shell scripts staged on the pull request layer.
//!
//! Every script runs under `set -e`. The pre-test pass at the end of
//! `prepare.sh` is the only command allowed to fail. A patch that does not
//! apply makes `test-run.sh`/`fix-run.sh` exit with
//! [`PATCH_APPLY_FAILED_EXIT`] so the harness can tell it apart from a
//! failing test suite. Empty patches are not passed to `git apply`, which
//! rejects a diff without hunks.

use super::toolchain::Toolchain;
use crate::error::ImageError;

/// Exit status of a phase script whose patches did not apply.
pub const PATCH_APPLY_FAILED_EXIT: i64 = 86;

pub const FIX_PATCH: &str = "fix.patch";
pub const TEST_PATCH: &str = "test.patch";
pub const RUN_SCRIPT: &str = "run.sh";
pub const TEST_RUN_SCRIPT: &str = "test-run.sh";
pub const FIX_RUN_SCRIPT: &str = "fix-run.sh";
pub const CHECK_GIT_CHANGES_SCRIPT: &str = "check_git_changes.sh";
pub const PREPARE_SCRIPT: &str = "prepare.sh";

/// In-container directory every staged file is copied to.
pub const STAGE_DIR: &str = "/home/";

/// Patches applied by `fix-run.sh`, in application order.
const FIX_RUN_ORDER: [&str; 2] = ["/home/test.patch", "/home/fix.patch"];

const CHECK_GIT_CHANGES: &str = r#"#!/bin/bash
set -e

if ! git rev-parse --is-inside-work-tree > /dev/null 2>&1; then
  echo "check_git_changes: Not inside a git repository"
  exit 1
fi

if [[ -n $(git status --porcelain) ]]; then
  echo "check_git_changes: Uncommitted changes"
  exit 1
fi

echo "check_git_changes: No uncommitted changes"
exit 0
"#;

fn header(repo: &str) -> String {
    format!("#!/bin/bash\nset -e\n\ncd /home/{repo}\n")
}

/// Baseline: the suite at the base commit, no patches.
pub fn run_script(repo: &str, toolchain: &Toolchain) -> String {
    format!("{}{}\n", header(repo), toolchain.test_cmd)
}

/// Staged patch files to apply, in test-then-fix order, leaving out the
/// ones whose content is empty.
pub fn patches_to_apply(test_patch: &str, fix_patch: &str) -> Vec<&'static str> {
    FIX_RUN_ORDER
        .into_iter()
        .zip([test_patch, fix_patch])
        .filter(|(_, content)| !content.trim().is_empty())
        .map(|(path, _)| path)
        .collect()
}

fn phase_script(repo: &str, toolchain: &Toolchain, patches: &[&str]) -> String {
    let mut script = header(repo);
    if !patches.is_empty() {
        script.push_str(&format!(
            "{} || exit {PATCH_APPLY_FAILED_EXIT}\n",
            toolchain.git_apply(patches)
        ));
    }
    script.push_str(toolchain.test_cmd);
    script.push('\n');
    script
}

/// Applies the test patch, then runs the suite.
pub fn test_run_script(repo: &str, toolchain: &Toolchain, test_patch: &str) -> String {
    phase_script(repo, toolchain, &patches_to_apply(test_patch, ""))
}

/// Applies the test patch and then the fix patch in one `git apply`, then
/// runs the suite.
pub fn fix_run_script(repo: &str, toolchain: &Toolchain, test_patch: &str, fix_patch: &str) -> String {
    phase_script(repo, toolchain, &patches_to_apply(test_patch, fix_patch))
}

/// Fails unless the working directory is a clean git checkout.
pub fn check_git_changes_script() -> &'static str {
    CHECK_GIT_CHANGES
}

/// Resets the checkout to the base commit, runs helper steps and injected
/// setup commands, then warms the build with a pre-test pass whose failure
/// is tolerated.
pub fn prepare_script(
    repo: &str,
    base_sha: &str,
    toolchain: &Toolchain,
    setup_commands: &[String],
) -> String {
    let mut script = header(repo);
    script.push_str("git reset --hard\n");
    script.push_str("bash /home/check_git_changes.sh\n");
    script.push_str(&format!("git checkout {base_sha}\n"));
    script.push_str("bash /home/check_git_changes.sh\n");
    for helper in toolchain.helpers {
        script.push_str(&format!("bash /home/{} /home/{repo}\n", helper.name));
    }
    script.push_str("\n# Injected setup commands\n");
    for cmd in setup_commands {
        script.push_str(cmd);
        script.push('\n');
    }
    script.push_str(&format!("\n{} || true\n", toolchain.test_cmd));
    script
}

/// Patch files passed to the first `git apply` of a script, in order.
pub fn applied_patches(script: &str) -> Vec<String> {
    script
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("git apply"))
        .map(|line| {
            line.split_whitespace()
                .take_while(|tok| *tok != "||" && *tok != "&&")
                .filter(|tok| tok.ends_with(".patch"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Rejects a `fix-run.sh` that does not apply exactly `expected`, the
/// result of [`patches_to_apply`] for the staged patches.
pub fn check_patch_order(image: &str, script: &str, expected: &[&str]) -> Result<(), ImageError> {
    let found = applied_patches(script);
    if found.iter().map(String::as_str).eq(expected.iter().copied()) {
        return Ok(());
    }
    let describe = |patches: Vec<&str>| {
        if patches.is_empty() {
            "no patches".to_string()
        } else {
            patches.join(", ")
        }
    };
    Err(ImageError::PatchOrder {
        image: image.to_string(),
        found: describe(found.iter().map(String::as_str).collect()),
        expected: describe(expected.to_vec()),
    })
}
