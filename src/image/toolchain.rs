//! Toolchain profiles.
//!
//! A profile is everything a repository adapter contributes to its image
//! chain: the external base image, packages and environment of the base
//! layer, the test command, `git apply` flags, helper scripts and the log
//! grammar used to read the test output.

use crate::verdict::LogGrammar;

/// A script staged next to the patches and run by `prepare.sh` as
/// `bash /home/<name> /home/<repo>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperScript {
    pub name: &'static str,
    pub content: &'static str,
}

/// Build and test profile of one language toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toolchain {
    /// Language label shown in listings.
    pub language: &'static str,
    /// External image the base layer starts from.
    pub base_image: &'static str,
    /// Environment fixed in the base layer.
    pub env: &'static [(&'static str, &'static str)],
    /// Packages installed with apt in the base layer.
    pub apt_packages: &'static [&'static str],
    /// Command that runs the whole test suite from the repository root.
    pub test_cmd: &'static str,
    /// Extra `git apply` flags, e.g. `--whitespace=nowarn`.
    pub apply_flags: &'static str,
    pub helpers: &'static [HelperScript],
    pub grammar: LogGrammar,
}

impl Toolchain {
    /// `git apply` invocation for the given patch files, in order.
    pub fn git_apply(&self, patches: &[&str]) -> String {
        let mut cmd = String::from("git apply");
        if !self.apply_flags.is_empty() {
            cmd.push(' ');
            cmd.push_str(self.apply_flags);
        }
        for patch in patches {
            cmd.push(' ');
            cmd.push_str(patch);
        }
        cmd
    }
}
