//! Go adapters.

use super::{Instance, InstanceRegistry, RegistryEntry, RepoInstance};
use crate::config::Config;
use crate::dataset::PullRequest;
use crate::error::RegistryError;
use crate::image::{HelperScript, Toolchain};
use crate::verdict::LogGrammar;

/// Replaces every Go file whose entire content is a relative path to another
/// Go file with the content of that file. Some repositories check in such
/// path-only files in place of symlinks.
const RESOLVE_GO_FILE: HelperScript = HelperScript {
    name: "resolve_go_file.sh",
    content: r#"#!/bin/bash
set -e

REPO_PATH="$1"
find "$REPO_PATH" -type f -name "*.go" | while read -r file; do
  content=$(cat "$file")
  if [[ "$content" =~ ^[./a-zA-Z0-9_-]+\.go$ ]]; then
    resolved=$(realpath -m "$(dirname "$file")/$content")
    if [ -f "$resolved" ]; then
      cat "$resolved" > "$file"
    fi
  fi
done
"#,
};

pub static GO: Toolchain = Toolchain {
    language: "go",
    base_image: "golang:latest",
    env: &[],
    apt_packages: &[],
    test_cmd: "go test -v -count=1 ./...",
    apply_flags: "",
    helpers: &[RESOLVE_GO_FILE],
    grammar: LogGrammar::GoTest,
};

fn create(pr: PullRequest, config: Config) -> Box<dyn Instance> {
    Box::new(RepoInstance::new(pr, config, &GO))
}

pub fn register(registry: &mut InstanceRegistry) -> Result<(), RegistryError> {
    registry.register(RegistryEntry::new("gin-gonic", "gin", &GO, create))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gin_prepare_resolves_go_files() {
        let pr = PullRequest::new("gin-gonic", "gin", 3741, "f0ba26d", "", "");
        let files = create(pr, Config::new(true)).dependency().files();

        let helper = files.iter().find(|f| f.name == "resolve_go_file.sh").unwrap();
        assert!(helper.content.contains("realpath -m"));

        let prepare = files.iter().find(|f| f.name == "prepare.sh").unwrap();
        assert!(prepare
            .content
            .contains("bash /home/resolve_go_file.sh /home/gin\n"));
        assert!(prepare
            .content
            .ends_with("go test -v -count=1 ./... || true\n"));
    }
}
