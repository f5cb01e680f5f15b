//! Per-toolchain log grammars.
//!
//! Every grammar is total: it never fails on malformed input, lines that match
//! no pattern are dropped, and the result is a pure function of the log text.

use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{TestResult, VerdictBuilder};

/// Log grammar of a test toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogGrammar {
    /// `go test -v` output.
    GoTest,
    /// Maven Surefire console output.
    Maven,
    /// libtest output from `cargo test`.
    CargoTest,
}

impl LogGrammar {
    /// Reduces raw runner output to a normalized verdict.
    pub fn parse(&self, log: &str) -> TestResult {
        match self {
            Self::GoTest => parse_go_test(log),
            Self::Maven => parse_maven(log),
            Self::CargoTest => parse_cargo_test(log),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GoTest => "go-test",
            Self::Maven => "maven",
            Self::CargoTest => "cargo-test",
        }
    }
}

impl std::fmt::Display for LogGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

static GO_PASS: LazyLock<Regex> = LazyLock::new(|| compile(r"^--- PASS: (\S+)"));
static GO_FAIL: LazyLock<Regex> = LazyLock::new(|| compile(r"^--- FAIL: (\S+)"));
static GO_SKIP: LazyLock<Regex> = LazyLock::new(|| compile(r"^--- SKIP: (\S+)"));
static GO_PKG_FAIL: LazyLock<Regex> = LazyLock::new(|| compile(r"^FAIL\s+(\S+)"));
static GO_PKG_OK: LazyLock<Regex> = LazyLock::new(|| compile(r"^ok\s+(\S+)"));

static MAVEN_RUNNING: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^(?:\[[A-Z]+\]\s+)?Running\s+(\S.*?)\s*$"));
static MAVEN_TESTS_RUN: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"^(?:\[[A-Z]+\]\s+)?Tests run:\s*(\d+),\s*Failures:\s*(\d+),\s*Errors:\s*(\d+),\s*Skipped:\s*(\d+),\s*Time elapsed:\s*[\d.,]+\s*s(?:ec)?\b",
    )
});
static MAVEN_SUMMARY_CLASS: LazyLock<Regex> = LazyLock::new(|| compile(r" - in (\S+)\s*$"));

/// Doctest names carry spaces: `src/lib.rs - foo (line 12)`.
static CARGO_TEST: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^test (\S.*?) \.\.\. (ok|FAILED|ignored)\b"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in log pattern must compile")
}

/// `go test -v`: `--- PASS|FAIL|SKIP: <name>` per test, `FAIL <pkg>` and
/// `ok <pkg>` per package. A package that fails to build only shows up in
/// its `FAIL` line, so packages get their own `pkg::` identifiers on both
/// sides.
pub fn parse_go_test(log: &str) -> TestResult {
    let mut verdict = VerdictBuilder::new();
    for line in log.lines() {
        let line = line.trim();
        if let Some(caps) = GO_PASS.captures(line) {
            verdict.pass(&caps[1]);
        }
        if let Some(caps) = GO_FAIL.captures(line) {
            verdict.fail(&caps[1]);
        }
        if let Some(caps) = GO_SKIP.captures(line) {
            verdict.skip(&caps[1]);
        }
        if let Some(caps) = GO_PKG_FAIL.captures(line) {
            verdict.fail_package(&caps[1]);
        }
        if let Some(caps) = GO_PKG_OK.captures(line) {
            verdict.pass_package(&caps[1]);
        }
    }
    verdict.finish()
}

/// Maven Surefire: a `Running <class>` line opens a test class and a
/// `Tests run: ...` line with a `Time elapsed` summary closes one. Classes
/// nest (JUnit 5 `@Nested`), so a summary closes the class its `- in <class>`
/// suffix names, or the innermost open class when there is no suffix.
pub fn parse_maven(log: &str) -> TestResult {
    let mut verdict = VerdictBuilder::new();
    let mut open: Vec<String> = Vec::new();

    for line in log.lines() {
        let line = line.trim_end();
        if let Some(caps) = MAVEN_RUNNING.captures(line) {
            open.push(caps[1].to_string());
            continue;
        }
        let Some(caps) = MAVEN_TESTS_RUN.captures(line) else {
            continue;
        };
        let Some(class) = close_class(&mut open, line) else {
            continue;
        };
        let count = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
        let (run, failures, errors, skipped) = (count(1), count(2), count(3), count(4));
        let marked_failure = line.contains("<<< FAILURE!") || line.contains("<<< ERROR!");

        if failures > 0 || errors > 0 || marked_failure {
            verdict.fail(class);
        } else if run > 0 && skipped != run {
            verdict.pass(class);
        } else if skipped == run {
            verdict.skip(class);
        }
    }
    verdict.finish()
}

fn close_class(open: &mut Vec<String>, summary: &str) -> Option<String> {
    let named = MAVEN_SUMMARY_CLASS
        .captures(summary)
        .and_then(|caps| open.iter().rposition(|class| *class == caps[1]));
    match named {
        Some(i) => Some(open.remove(i)),
        None => open.pop(),
    }
}

/// libtest: `test <name> ... ok|FAILED|ignored`.
pub fn parse_cargo_test(log: &str) -> TestResult {
    let mut verdict = VerdictBuilder::new();
    for line in log.lines() {
        let Some(caps) = CARGO_TEST.captures(line.trim()) else {
            continue;
        };
        match &caps[2] {
            "ok" => verdict.pass(&caps[1]),
            "FAILED" => verdict.fail(&caps[1]),
            _ => verdict.skip(&caps[1]),
        }
    }
    verdict.finish()
}
