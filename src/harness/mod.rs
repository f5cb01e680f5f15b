//! Evaluation harness.
//!
//! For one pull request the harness resolves its adapter, materializes and
//! builds the image chain parent first, then runs the three phases in
//! order, each in its own container:
//!
//! 1. `run`: base commit, no patches
//! 2. `test-patch-run`: test patch applied
//! 3. `fix-patch-run`: test patch then fix patch applied
//!
//! Each phase log is reduced to a [`TestResult`] and the three verdicts are
//! certified together. Failing to construct the environment aborts the
//! evaluation; a phase that cannot produce a trustworthy log (patch does not
//! apply, timeout, engine error) is undetermined and blocks certification
//! without aborting the remaining phases.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, HarnessConfig};
use crate::dataset::PullRequest;
use crate::error::{DockerError, HarnessError, ImageError};
use crate::execution::ContainerBackend;
use crate::image::scripts::PATCH_APPLY_FAILED_EXIT;
use crate::image::{materialize_chain, resolve_chain, LayerContext};
use crate::instance::{Instance, InstanceRegistry};
use crate::verdict::{certify, Certification, TestResult};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One of the three test phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Run,
    TestPatchRun,
    FixPatchRun,
}

impl Phase {
    /// Execution order.
    pub const ALL: [Phase; 3] = [Phase::Run, Phase::TestPatchRun, Phase::FixPatchRun];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::TestPatchRun => "test-patch-run",
            Self::FixPatchRun => "fix-patch-run",
        }
    }

    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.name())
    }

    /// Command for this phase, honoring per-phase overrides.
    pub fn command(&self, instance: &dyn Instance, config: &HarnessConfig) -> String {
        match self {
            Self::Run => instance.run(config.run_cmd.as_deref()),
            Self::TestPatchRun => instance.test_patch_run(config.test_patch_run_cmd.as_deref()),
            Self::FixPatchRun => instance.fix_patch_run(config.fix_patch_run_cmd.as_deref()),
        }
    }

    /// Whether the phase script applies patches.
    pub fn applies_patches(&self) -> bool {
        !matches!(self, Self::Run)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The suite ran; failing tests are part of `result`.
    Completed { exit_code: i64, result: TestResult },
    /// No trustworthy verdict could be obtained.
    Undetermined { reason: String },
}

impl PhaseOutcome {
    pub fn result(&self) -> Option<&TestResult> {
        match self {
            Self::Completed { result, .. } => Some(result),
            Self::Undetermined { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub command: String,
    pub outcome: PhaseOutcome,
    pub duration_secs: f64,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Resolved,
    Unresolved,
    Undetermined,
    SetupError,
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Unresolved => write!(f, "unresolved"),
            Self::Undetermined => write!(f, "undetermined"),
            Self::SetupError => write!(f, "setup_error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: String,
    pub repo: String,
    pub number: u64,
    pub status: EvaluationStatus,
    pub image: Option<String>,
    pub phases: Vec<PhaseReport>,
    pub certification: Option<Certification>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl EvaluationReport {
    /// Report for an evaluation aborted before any phase ran.
    pub fn setup_error(pr: &PullRequest, err: &HarnessError, started_at: DateTime<Utc>, duration_secs: f64) -> Self {
        Self {
            id: pr.id(),
            repo: pr.full_repo(),
            number: pr.number(),
            status: EvaluationStatus::SetupError,
            image: None,
            phases: Vec::new(),
            certification: None,
            failed_stage: Some(err.stage().to_string()),
            error: Some(err.to_string()),
            started_at,
            duration_secs,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSummary {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub undetermined: usize,
    pub setup_error: usize,
    pub results: Vec<EvaluationReport>,
}

impl HarnessSummary {
    pub fn from_reports(results: Vec<EvaluationReport>) -> Self {
        let count = |status: EvaluationStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            resolved: count(EvaluationStatus::Resolved),
            unresolved: count(EvaluationStatus::Unresolved),
            undetermined: count(EvaluationStatus::Undetermined),
            setup_error: count(EvaluationStatus::SetupError),
            results,
        }
    }
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

/// An adapter with its build contexts on disk.
pub struct PreparedEvaluation {
    pub instance: Box<dyn Instance>,
    /// Parent first; the last context is the image the phases run in.
    pub contexts: Vec<LayerContext>,
}

impl PreparedEvaluation {
    pub fn image(&self) -> Option<&str> {
        self.contexts.last().map(|c| c.image.as_str())
    }
}

/// Validates inputs, resolves the adapter and writes every build context.
/// Nothing is built.
pub fn prepare(
    registry: &InstanceRegistry,
    harness_config: &HarnessConfig,
    pr: &PullRequest,
    config: &Config,
) -> Result<PreparedEvaluation, HarnessError> {
    config.validate()?;
    pr.validate()
        .map_err(|e| ImageError::InvalidPullRequest(e.to_string()))?;

    let instance = registry.create(pr, config)?;
    debug!(instance = %pr.id(), "Resolved instance");

    let chain = resolve_chain(instance.dependency())?;
    let contexts = materialize_chain(&chain, &harness_config.workspace_dir, &harness_config.repo_dir)?;
    Ok(PreparedEvaluation { instance, contexts })
}

/// Directory holding the logs and report of one pull request.
pub fn eval_dir(workspace: &Path, pr: &PullRequest) -> PathBuf {
    workspace
        .join(pr.org())
        .join(pr.repo())
        .join("evals")
        .join(format!("pr-{}", pr.number()))
}

fn container_name(pr: &PullRequest, phase: Phase) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("swe-harness-{}-{}-{}", pr.id(), phase, &suffix[..8])
}

/// Certifies the phases if all three completed.
fn conclude(phases: &[PhaseReport]) -> (EvaluationStatus, Option<Certification>) {
    let results: Vec<&TestResult> = phases.iter().filter_map(|p| p.outcome.result()).collect();
    match results.as_slice() {
        [run, test, fix] if phases.len() == 3 => {
            let certification = certify(run, test, fix);
            let status = if certification.valid {
                EvaluationStatus::Resolved
            } else {
                EvaluationStatus::Unresolved
            };
            (status, Some(certification))
        }
        _ => (EvaluationStatus::Undetermined, None),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness<B: ContainerBackend> {
    backend: B,
    registry: Arc<InstanceRegistry>,
    config: HarnessConfig,
}

impl<B: ContainerBackend> Harness<B> {
    pub fn new(backend: B, registry: Arc<InstanceRegistry>, config: HarnessConfig) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Evaluates one pull request end to end and writes its logs and report.
    pub async fn evaluate(&self, pr: &PullRequest, config: &Config) -> Result<EvaluationReport, HarnessError> {
        let started_at = Utc::now();
        let total_start = Instant::now();
        info!(instance = %pr.id(), need_clone = config.need_clone, "Evaluating pull request");

        let prepared = prepare(&self.registry, &self.config, pr, config)?;
        self.build_chain(&prepared.contexts).await?;

        let image = prepared
            .image()
            .ok_or_else(|| ImageError::InvalidPullRequest(format!("{} resolved to an empty image chain", pr.id())))?
            .to_string();

        let dir = eval_dir(&self.config.workspace_dir, pr);
        fs::create_dir_all(&dir)?;

        let mut phases = Vec::with_capacity(Phase::ALL.len());
        for phase in Phase::ALL {
            let report = self
                .run_phase(prepared.instance.as_ref(), &image, phase, &dir)
                .await;
            phases.push(report);
        }

        let (status, certification) = conclude(&phases);
        if let Some(cert) = &certification {
            info!(
                instance = %pr.id(),
                valid = cert.valid,
                fail_to_pass = cert.fail_to_pass.len(),
                pass_to_pass = cert.pass_to_pass.len(),
                unresolved = cert.unresolved.len(),
                regressions = cert.regressions.len(),
                "Certified fix"
            );
        }

        let report = EvaluationReport {
            id: pr.id(),
            repo: pr.full_repo(),
            number: pr.number(),
            status,
            image: Some(image),
            phases,
            certification,
            failed_stage: None,
            error: None,
            started_at,
            duration_secs: total_start.elapsed().as_secs_f64(),
        };
        if let Err(e) = self.write_report(pr, &report) {
            warn!(instance = %pr.id(), error = %e, "Failed to write report");
        }
        info!(instance = %pr.id(), status = %report.status, "Evaluation finished");
        Ok(report)
    }

    /// Evaluates every pull request in order. Aborted evaluations are
    /// recorded as `setup_error`.
    pub async fn run_dataset(&self, prs: &[PullRequest], config: &Config) -> HarnessSummary {
        info!("Evaluating {} pull requests", prs.len());
        let mut results = Vec::with_capacity(prs.len());

        for pr in prs {
            let started_at = Utc::now();
            let start = Instant::now();
            match self.evaluate(pr, config).await {
                Ok(report) => results.push(report),
                Err(e) => {
                    warn!(instance = %pr.id(), stage = e.stage(), error = %e, "Evaluation aborted");
                    let report = EvaluationReport::setup_error(pr, &e, started_at, start.elapsed().as_secs_f64());
                    if let Err(write_err) = self.write_report(pr, &report) {
                        warn!(instance = %pr.id(), error = %write_err, "Failed to write report");
                    }
                    results.push(report);
                }
            }
        }

        HarnessSummary::from_reports(results)
    }

    async fn build_chain(&self, contexts: &[LayerContext]) -> Result<(), HarnessError> {
        for ctx in contexts {
            if !self.config.force_build && self.backend.image_exists(&ctx.image).await {
                info!(image = %ctx.image, "Reusing existing image");
                continue;
            }

            let start = Instant::now();
            let build = timeout(
                self.config.build_timeout,
                self.backend.build_image(&ctx.image, &ctx.dir),
            )
            .await
            .unwrap_or(Err(DockerError::Timeout {
                seconds: self.config.build_timeout.as_secs(),
            }));

            build.map_err(|source| HarnessError::Build {
                image: ctx.image.clone(),
                source,
            })?;
            info!(image = %ctx.image, secs = start.elapsed().as_secs(), "Built image");
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        instance: &dyn Instance,
        image: &str,
        phase: Phase,
        dir: &Path,
    ) -> PhaseReport {
        let pr = instance.pr();
        let command = phase.command(instance, &self.config);
        let container = container_name(pr, phase);
        let start = Instant::now();
        info!(instance = %pr.id(), phase = %phase, command = %command, "Running phase");

        let run = timeout(
            self.config.run_timeout,
            self.backend
                .run(image, &container, &command, self.config.keep_containers),
        )
        .await;

        let mut log_path = None;
        let outcome = match run {
            Err(_) => {
                if let Err(e) = self.backend.remove_container(&container).await {
                    debug!(container = %container, error = %e, "Failed to remove timed out container");
                }
                PhaseOutcome::Undetermined {
                    reason: DockerError::Timeout {
                        seconds: self.config.run_timeout.as_secs(),
                    }
                    .to_string(),
                }
            }
            Ok(Err(e)) => PhaseOutcome::Undetermined {
                reason: e.to_string(),
            },
            Ok(Ok(output)) => {
                let path = dir.join(phase.log_file_name());
                match fs::write(&path, &output.log) {
                    Ok(()) => log_path = Some(path),
                    Err(e) => warn!(
                        instance = %pr.id(),
                        phase = %phase,
                        path = %path.display(),
                        error = %e,
                        "Failed to write phase log"
                    ),
                }

                if phase.applies_patches() && output.exit_code == PATCH_APPLY_FAILED_EXIT {
                    PhaseOutcome::Undetermined {
                        reason: format!("patches did not apply (exit {PATCH_APPLY_FAILED_EXIT})"),
                    }
                } else {
                    let result = instance.parse_log(&output.log);
                    if result.is_empty() && !output.log.trim().is_empty() {
                        warn!(
                            instance = %pr.id(),
                            phase = %phase,
                            bytes = output.log.len(),
                            "Log produced no test identifiers; output format may have drifted"
                        );
                    }
                    PhaseOutcome::Completed {
                        exit_code: output.exit_code,
                        result,
                    }
                }
            }
        };

        match &outcome {
            PhaseOutcome::Completed { exit_code, result } => info!(
                instance = %pr.id(),
                phase = %phase,
                exit_code = *exit_code,
                passed = result.passed_count(),
                failed = result.failed_count(),
                skipped = result.skipped_count(),
                "Phase completed"
            ),
            PhaseOutcome::Undetermined { reason } => {
                warn!(instance = %pr.id(), phase = %phase, reason = %reason, "Phase undetermined")
            }
        }

        PhaseReport {
            phase,
            command,
            outcome,
            duration_secs: start.elapsed().as_secs_f64(),
            log_path,
        }
    }

    fn write_report(&self, pr: &PullRequest, report: &EvaluationReport) -> Result<(), HarnessError> {
        let dir = eval_dir(&self.config.workspace_dir, pr);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
        fs::write(dir.join("report.json"), json)?;
        Ok(())
    }
}
