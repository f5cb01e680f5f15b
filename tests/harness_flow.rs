//! End-to-end harness flow against an in-memory container backend.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use swe_harness::config::{Config, HarnessConfig};
use swe_harness::dataset::{load_dataset, PullRequest};
use swe_harness::error::DockerError;
use swe_harness::execution::{ContainerBackend, RunOutput};
use swe_harness::harness::{eval_dir, prepare, EvaluationStatus, Harness, Phase, PhaseOutcome};
use swe_harness::instance::InstanceRegistry;

/// Records builds and answers runs from canned logs keyed by command.
#[derive(Clone, Default)]
struct ScriptedBackend {
    logs: HashMap<String, (i64, String)>,
    builds: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn phase(mut self, command: &str, exit_code: i64, log: &str) -> Self {
        self.logs
            .insert(command.to_string(), (exit_code, log.to_string()));
        self
    }

    fn built(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerBackend for ScriptedBackend {
    async fn image_exists(&self, _image: &str) -> bool {
        false
    }

    async fn build_image(&self, image: &str, context_dir: &Path) -> Result<(), DockerError> {
        if !context_dir.join("Dockerfile").is_file() {
            return Err(DockerError::BuildFailed(format!("{image}: no Dockerfile")));
        }
        self.builds.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn run(
        &self,
        _image: &str,
        _container_name: &str,
        command: &str,
        _keep: bool,
    ) -> Result<RunOutput, DockerError> {
        let (exit_code, log) = self
            .logs
            .get(command)
            .cloned()
            .ok_or_else(|| DockerError::RunFailed(format!("unexpected command {command}")))?;
        Ok(RunOutput { exit_code, log })
    }

    async fn remove_container(&self, _container_name: &str) -> Result<(), DockerError> {
        Ok(())
    }
}

fn harness_config(workspace: &Path) -> HarnessConfig {
    HarnessConfig {
        workspace_dir: workspace.join("workspace"),
        repo_dir: workspace.join("repos"),
        ..Default::default()
    }
}

fn ripgrep_pr() -> PullRequest {
    PullRequest::new(
        "BurntSushi",
        "ripgrep",
        2610,
        "a3a30896be9c1b4ba4cc7a6c2b1e4b1f8b0e0a61",
        "diff --git a/crates/printer/src/util.rs b/crates/printer/src/util.rs\n",
        "diff --git a/tests/regression.rs b/tests/regression.rs\n",
    )
}

#[tokio::test]
async fn test_staged_source_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let staged = tmp.path().join("repos/BurntSushi/ripgrep/crates/core");
    fs::create_dir_all(&staged).unwrap();
    fs::write(staged.join("main.rs"), "fn main() {}\n").unwrap();

    let backend = ScriptedBackend::default()
        .phase(
            "bash /home/run.sh",
            0,
            "test printer::tests::trim ... ok\ntest regression::r2236 ... ok\n",
        )
        .phase(
            "bash /home/test-run.sh",
            101,
            "test printer::tests::trim ... ok\ntest regression::r2236 ... ok\ntest regression::r2610 ... FAILED\n",
        )
        .phase(
            "bash /home/fix-run.sh",
            0,
            "test printer::tests::trim ... ok\ntest regression::r2236 ... ok\ntest regression::r2610 ... ok\n",
        );
    let registry = Arc::new(InstanceRegistry::with_builtin().unwrap());
    let harness = Harness::new(backend.clone(), registry, harness_config(tmp.path()));

    let report = harness
        .evaluate(&ripgrep_pr(), &Config::new(false))
        .await
        .unwrap();
    assert_eq!(report.status, EvaluationStatus::Resolved);

    let cert = report.certification.as_ref().unwrap();
    assert_eq!(
        cert.fail_to_pass.iter().collect::<Vec<_>>(),
        vec!["regression::r2610"]
    );
    assert_eq!(cert.pass_to_pass.len(), 2);
    assert!(cert.regressions.is_empty());

    assert_eq!(
        backend.built(),
        vec![
            "swe-harness/burntsushi_m_ripgrep:base",
            "swe-harness/burntsushi_m_ripgrep:pr-2610"
        ]
    );

    let base_ctx = tmp
        .path()
        .join("workspace/BurntSushi/ripgrep/images/base");
    let dockerfile = fs::read_to_string(base_ctx.join("Dockerfile")).unwrap();
    assert!(dockerfile.contains("COPY ripgrep /home/ripgrep"));
    assert!(!dockerfile.contains("git clone"));
    assert!(base_ctx.join("ripgrep/crates/core/main.rs").is_file());

    let dir = eval_dir(&harness.config().workspace_dir, &ripgrep_pr());
    let report_json = fs::read_to_string(dir.join("report.json")).unwrap();
    assert!(report_json.contains("\"status\": \"resolved\""));
    assert!(fs::read_to_string(dir.join("test-patch-run.log"))
        .unwrap()
        .contains("r2610 ... FAILED"));
}

#[tokio::test]
async fn test_regression_blocks_certification() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::default()
        .phase("bash /home/run.sh", 0, "test a::kept ... ok\n")
        .phase(
            "bash /home/test-run.sh",
            101,
            "test a::kept ... ok\ntest a::target ... FAILED\n",
        )
        .phase(
            "bash /home/fix-run.sh",
            101,
            "test a::kept ... FAILED\ntest a::target ... ok\n",
        );
    let harness = Harness::new(
        backend,
        Arc::new(InstanceRegistry::with_builtin().unwrap()),
        harness_config(tmp.path()),
    );

    let report = harness
        .evaluate(&ripgrep_pr(), &Config::new(true))
        .await
        .unwrap();
    assert_eq!(report.status, EvaluationStatus::Unresolved);

    let cert = report.certification.unwrap();
    assert!(!cert.valid);
    assert!(cert.fail_to_pass.contains("a::target"));
    assert!(cert.regressions.contains("a::kept"));
    assert!(matches!(
        report.phases[2].outcome,
        PhaseOutcome::Completed { exit_code: 101, .. }
    ));
}

#[tokio::test]
async fn test_dataset_with_mixed_outcomes() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = tmp.path().join("prs.jsonl");
    fs::write(
        &dataset,
        concat!(
            r#"{"org":"apache","repo":"dubbo","number":11781,"base":{"label":"apache:3.2","ref":"3.2","sha":"d0a1bd0"},"fix_patch":"f","test_patch":"t"}"#,
            "\n\n",
            r#"{"org":"octo","repo":"cat","number":7,"base":{"sha":"abc"}}"#,
            "\n",
        ),
    )
    .unwrap();
    let prs = load_dataset(&dataset).unwrap();
    assert_eq!(prs.len(), 2);

    let surefire = |failing: bool| {
        let summary = if failing {
            "Tests run: 3, Failures: 1, Errors: 0, Skipped: 0, Time elapsed: 0.41 s <<< FAILURE! - in org.apache.dubbo.common.URLTest"
        } else {
            "Tests run: 3, Failures: 0, Errors: 0, Skipped: 0, Time elapsed: 0.39 s - in org.apache.dubbo.common.URLTest"
        };
        format!(
            "[INFO] Running org.apache.dubbo.common.URLStrParserTest\n\
             [INFO] Tests run: 5, Failures: 0, Errors: 0, Skipped: 0, Time elapsed: 0.05 s - in org.apache.dubbo.common.URLStrParserTest\n\
             [INFO] Running org.apache.dubbo.common.URLTest\n\
             [ERROR] {summary}\n"
        )
    };
    let baseline = "[INFO] Running org.apache.dubbo.common.URLStrParserTest\n\
                    [INFO] Tests run: 5, Failures: 0, Errors: 0, Skipped: 0, Time elapsed: 0.05 s - in org.apache.dubbo.common.URLStrParserTest\n";

    let backend = ScriptedBackend::default()
        .phase("bash /home/run.sh", 0, baseline)
        .phase("bash /home/test-run.sh", 1, &surefire(true))
        .phase("bash /home/fix-run.sh", 0, &surefire(false));
    let harness = Harness::new(
        backend,
        Arc::new(InstanceRegistry::with_builtin().unwrap()),
        harness_config(tmp.path()),
    );

    let summary = harness.run_dataset(&prs, &Config::new(true)).await;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.setup_error, 1);

    let dubbo = &summary.results[0];
    assert_eq!(dubbo.status, EvaluationStatus::Resolved);
    let cert = dubbo.certification.as_ref().unwrap();
    assert!(cert.fail_to_pass.contains("org.apache.dubbo.common.URLTest"));
    assert!(cert
        .pass_to_pass
        .contains("org.apache.dubbo.common.URLStrParserTest"));
    assert!(dubbo.phase(Phase::Run).is_some());

    let missing = &summary.results[1];
    assert_eq!(missing.status, EvaluationStatus::SetupError);
    assert_eq!(missing.failed_stage.as_deref(), Some("registry"));
}

#[test]
fn test_prepare_renders_clone_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::with_builtin().unwrap();
    let config = Config::new(true)
        .with_setup_commands(vec!["go mod download".to_string()])
        .with_global_env("GOFLAGS", "-mod=mod")
        .with_clear_env(true);
    let pr = PullRequest::new("gin-gonic", "gin", 3741, "f0ba26d", "fix", "test");

    let prepared = prepare(&registry, &harness_config(tmp.path()), &pr, &config).unwrap();
    assert_eq!(prepared.image(), Some("swe-harness/gin-gonic_m_gin:pr-3741"));
    assert_eq!(prepared.contexts.len(), 2);

    let base = fs::read_to_string(prepared.contexts[0].dir.join("Dockerfile")).unwrap();
    assert!(base.starts_with("FROM golang:latest"));
    assert!(base.contains("git clone https://github.com/gin-gonic/gin.git /home/gin"));
    assert!(base.contains("ENV GOFLAGS=\"-mod=mod\""));
    assert!(base.contains("ENV GOFLAGS=\"\""));

    let pr_dir = &prepared.contexts[1].dir;
    let prepare_sh = fs::read_to_string(pr_dir.join("prepare.sh")).unwrap();
    assert!(prepare_sh.contains("git checkout f0ba26d"));
    assert!(prepare_sh.contains("go mod download"));
    assert_eq!(fs::read_to_string(pr_dir.join("fix.patch")).unwrap(), "fix");
    assert_eq!(fs::read_to_string(pr_dir.join("test.patch")).unwrap(), "test");
}

#[test]
fn test_env_references_reach_every_layer_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let registry = InstanceRegistry::with_builtin().unwrap();
    let config = Config::new(true).with_global_env("PATH", "/opt/go/bin:$PATH");
    let pr = PullRequest::new("gin-gonic", "gin", 3741, "f0ba26d", "fix", "test");

    let prepared = prepare(&registry, &harness_config(tmp.path()), &pr, &config).unwrap();
    for ctx in &prepared.contexts {
        let dockerfile = fs::read_to_string(ctx.dir.join("Dockerfile")).unwrap();
        let line = dockerfile
            .lines()
            .find(|l| l.starts_with("ENV PATH="))
            .unwrap();
        assert_eq!(line, "ENV PATH=\"/opt/go/bin:$PATH\"", "{}", ctx.image);
    }
}
