//! The two layers every built-in adapter uses.
//!
//! `BaseImage` gets the source tree into `/home/<repo>` on top of the
//! toolchain image. `PrImage` stages the patches and run scripts of one pull
//! request and resets the checkout to its base commit.

use super::scripts::{self, STAGE_DIR};
use super::toolchain::Toolchain;
use super::{clear_env_block, global_env_block, Dependency, File, Image};
use crate::config::Config;
use crate::dataset::PullRequest;
use crate::docker::{DockerfileBuilder, Instruction};

/// Toolchain and source layer shared by every pull request of a repository.
#[derive(Debug, Clone)]
pub struct BaseImage {
    pr: PullRequest,
    config: Config,
    toolchain: &'static Toolchain,
}

impl BaseImage {
    pub fn new(pr: PullRequest, config: Config, toolchain: &'static Toolchain) -> Self {
        Self {
            pr,
            config,
            toolchain,
        }
    }

    fn source_instruction(&self) -> Instruction {
        let repo = self.pr.repo();
        if self.config.need_clone {
            Instruction::Run(format!(
                "git clone https://github.com/{}/{}.git /home/{}",
                self.pr.org(),
                repo,
                repo
            ))
        } else {
            Instruction::Copy {
                src: repo.to_string(),
                dest: format!("/home/{repo}"),
            }
        }
    }
}

impl Image for BaseImage {
    fn pr(&self) -> &PullRequest {
        &self.pr
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn dependency(&self) -> Dependency {
        Dependency::External(self.toolchain.base_image.to_string())
    }

    fn image_tag(&self) -> String {
        "base".to_string()
    }

    fn workdir(&self) -> String {
        "base".to_string()
    }

    fn files(&self) -> Vec<File> {
        Vec::new()
    }

    fn dockerfile(&self) -> String {
        let toolchain_env = self.toolchain.env.iter().map(|(key, value)| Instruction::Env {
            key: key.to_string(),
            value: value.to_string(),
        });

        DockerfileBuilder::new(self.dependency().reference())
            .block(global_env_block(&self.config))
            .block(toolchain_env)
            .workdir(STAGE_DIR)
            .apt_install(self.toolchain.apt_packages)
            .push(self.source_instruction())
            .blank()
            .block(clear_env_block(&self.config))
            .build()
    }

    fn staged_source(&self) -> Option<String> {
        (!self.config.need_clone).then(|| self.pr.repo().to_string())
    }
}

/// Per pull request layer: patches, run scripts and the prepared checkout.
#[derive(Debug, Clone)]
pub struct PrImage {
    pr: PullRequest,
    config: Config,
    toolchain: &'static Toolchain,
}

impl PrImage {
    pub fn new(pr: PullRequest, config: Config, toolchain: &'static Toolchain) -> Self {
        Self {
            pr,
            config,
            toolchain,
        }
    }
}

impl Image for PrImage {
    fn pr(&self) -> &PullRequest {
        &self.pr
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn dependency(&self) -> Dependency {
        Dependency::Image(Box::new(BaseImage::new(
            self.pr.clone(),
            self.config.clone(),
            self.toolchain,
        )))
    }

    fn image_tag(&self) -> String {
        format!("pr-{}", self.pr.number())
    }

    fn workdir(&self) -> String {
        format!("pr-{}", self.pr.number())
    }

    fn files(&self) -> Vec<File> {
        let repo = self.pr.repo();
        let tc = self.toolchain;

        let mut files = vec![
            File::new(".", scripts::FIX_PATCH, self.pr.fix_patch()),
            File::new(".", scripts::TEST_PATCH, self.pr.test_patch()),
            File::new(".", scripts::RUN_SCRIPT, scripts::run_script(repo, tc)),
            File::new(
                ".",
                scripts::TEST_RUN_SCRIPT,
                scripts::test_run_script(repo, tc, self.pr.test_patch()),
            ),
            File::new(
                ".",
                scripts::FIX_RUN_SCRIPT,
                scripts::fix_run_script(repo, tc, self.pr.test_patch(), self.pr.fix_patch()),
            ),
            File::new(
                ".",
                scripts::CHECK_GIT_CHANGES_SCRIPT,
                scripts::check_git_changes_script(),
            ),
        ];
        files.extend(tc.helpers.iter().map(|h| File::new(".", h.name, h.content)));
        files.push(File::new(
            ".",
            scripts::PREPARE_SCRIPT,
            scripts::prepare_script(
                repo,
                self.pr.base_sha(),
                tc,
                &self.config.setup_commands,
            ),
        ));
        files
    }

    fn dockerfile(&self) -> String {
        let files = self.files();

        let copies = files.iter().map(|f| Instruction::Copy {
            src: f.context_path(),
            dest: STAGE_DIR.to_string(),
        });

        let executables: Vec<String> = files
            .iter()
            .filter(|f| f.is_shell_script())
            .map(|f| format!("{STAGE_DIR}{}", f.name))
            .collect();

        let mut setup = Vec::new();
        if !executables.is_empty() {
            setup.push(Instruction::Run(format!("chmod +x {}", executables.join(" "))));
        }
        setup.push(Instruction::Run(format!(
            "bash {STAGE_DIR}{}",
            scripts::PREPARE_SCRIPT
        )));

        DockerfileBuilder::new(self.dependency().reference())
            .block(global_env_block(&self.config))
            .block(copies)
            .block(setup)
            .block(clear_env_block(&self.config))
            .build()
    }
}
