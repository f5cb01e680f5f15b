//! Java adapters built with Maven.

use super::{Instance, InstanceRegistry, RegistryEntry, RepoInstance};
use crate::config::Config;
use crate::dataset::PullRequest;
use crate::error::RegistryError;
use crate::image::Toolchain;
use crate::verdict::LogGrammar;

pub static MAVEN: Toolchain = Toolchain {
    language: "java",
    base_image: "ubuntu:22.04",
    env: &[
        ("DEBIAN_FRONTEND", "noninteractive"),
        ("LANG", "C.UTF-8"),
        ("LC_ALL", "C.UTF-8"),
    ],
    apt_packages: &["git", "ca-certificates", "openjdk-11-jdk", "maven"],
    test_cmd: "mvn clean test -Dmaven.test.skip=false -DfailIfNoTests=false",
    apply_flags: "--whitespace=nowarn",
    helpers: &[],
    grammar: LogGrammar::Maven,
};

fn create(pr: PullRequest, config: Config) -> Box<dyn Instance> {
    Box::new(RepoInstance::new(pr, config, &MAVEN))
}

pub fn register(registry: &mut InstanceRegistry) -> Result<(), RegistryError> {
    registry.register(RegistryEntry::new("apache", "dubbo", &MAVEN, create))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::resolve_chain;

    #[test]
    fn test_dubbo_base_installs_jdk_and_maven() {
        let pr = PullRequest::new("apache", "dubbo", 14052, "abc", "", "");
        let chain = resolve_chain(create(pr, Config::new(true)).dependency()).unwrap();
        let base = chain.layers[0].dockerfile();

        assert!(base.starts_with("FROM ubuntu:22.04\n"));
        assert!(base.contains("ENV DEBIAN_FRONTEND=\"noninteractive\""));
        assert!(base.contains("git ca-certificates openjdk-11-jdk maven"));
    }

    #[test]
    fn test_dubbo_applies_with_whitespace_nowarn() {
        let pr = PullRequest::new("apache", "dubbo", 14052, "abc", "diff f", "diff t");
        let files = create(pr, Config::new(true)).dependency().files();
        let test_run = files.iter().find(|f| f.name == "test-run.sh").unwrap();
        assert!(test_run
            .content
            .contains("git apply --whitespace=nowarn /home/test.patch || exit 86"));
    }
}
