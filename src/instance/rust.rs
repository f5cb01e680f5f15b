//! Rust adapters built with cargo.

use super::{Instance, InstanceRegistry, RegistryEntry, RepoInstance};
use crate::config::Config;
use crate::dataset::PullRequest;
use crate::error::RegistryError;
use crate::image::Toolchain;
use crate::verdict::LogGrammar;

pub static CARGO: Toolchain = Toolchain {
    language: "rust",
    base_image: "rust:latest",
    env: &[("CARGO_TERM_COLOR", "never")],
    apt_packages: &[],
    test_cmd: "cargo test --no-fail-fast",
    apply_flags: "",
    helpers: &[],
    grammar: LogGrammar::CargoTest,
};

fn create(pr: PullRequest, config: Config) -> Box<dyn Instance> {
    Box::new(RepoInstance::new(pr, config, &CARGO))
}

pub fn register(registry: &mut InstanceRegistry) -> Result<(), RegistryError> {
    registry.register(RegistryEntry::new("BurntSushi", "ripgrep", &CARGO, create))
}
