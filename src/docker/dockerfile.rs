//! Declarative Dockerfile generation.
//!
//! A Dockerfile is assembled as an ordered list of typed [`Instruction`]s and
//! rendered by a single renderer, so layer contents can be inspected and
//! tested without a container engine.

use std::fmt;

/// One Dockerfile instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `FROM <image>`
    From(String),
    /// `ENV <key>="<value>"`
    Env { key: String, value: String },
    /// `WORKDIR <dir>`
    Workdir(String),
    /// `RUN <command>`
    Run(String),
    /// `COPY <src> <dest>`
    Copy { src: String, dest: String },
    /// Empty separator line.
    Blank,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From(image) => write!(f, "FROM {image}"),
            Self::Env { key, value } => write!(f, "ENV {}=\"{}\"", key, quote_env_value(value)),
            Self::Workdir(dir) => write!(f, "WORKDIR {dir}"),
            Self::Run(cmd) => write!(f, "RUN {cmd}"),
            Self::Copy { src, dest } => write!(f, "COPY {src} {dest}"),
            Self::Blank => Ok(()),
        }
    }
}

/// Builder for Dockerfile content.
#[derive(Debug, Clone)]
pub struct DockerfileBuilder {
    instructions: Vec<Instruction>,
}

impl DockerfileBuilder {
    /// Starts a Dockerfile on top of `image`.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            instructions: vec![Instruction::From(image.into()), Instruction::Blank],
        }
    }

    pub fn push(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Appends a block of instructions followed by a separator. Empty blocks
    /// add nothing.
    pub fn block(mut self, block: impl IntoIterator<Item = Instruction>) -> Self {
        let before = self.instructions.len();
        self.instructions.extend(block);
        if self.instructions.len() > before {
            self.instructions.push(Instruction::Blank);
        }
        self
    }

    pub fn workdir(self, dir: impl Into<String>) -> Self {
        self.push(Instruction::Workdir(dir.into()))
    }

    pub fn run(self, cmd: impl Into<String>) -> Self {
        self.push(Instruction::Run(cmd.into()))
    }

    pub fn copy(self, src: impl Into<String>, dest: impl Into<String>) -> Self {
        self.push(Instruction::Copy {
            src: src.into(),
            dest: dest.into(),
        })
    }

    pub fn blank(self) -> Self {
        self.push(Instruction::Blank)
    }

    /// Installs apt packages in one layer. Invalid package names are dropped;
    /// nothing is emitted when no valid package remains.
    pub fn apt_install(self, packages: &[&str]) -> Self {
        let valid = filter_valid_packages(packages);
        if valid.is_empty() {
            return self;
        }
        self.run(format!(
            "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
            valid.join(" ")
        ))
    }

    /// Build and return the Dockerfile content as a string.
    pub fn build(&self) -> String {
        let mut lines: Vec<String> = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            // Collapse runs of separators.
            if *instruction == Instruction::Blank
                && lines.last().map(|l| l.is_empty()).unwrap_or(true)
            {
                continue;
            }
            lines.push(instruction.to_string());
        }
        while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
            lines.pop();
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Sources of every `COPY` instruction in rendered Dockerfile text.
pub fn copy_sources(dockerfile: &str) -> Vec<String> {
    dockerfile
        .lines()
        .filter_map(|line| line.trim().strip_prefix("COPY "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Quotes a value for `ENV key="value"`. Only quoting characters are
/// escaped; `$VAR` references are left for Docker to expand.
fn quote_env_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Validate a package name to prevent command injection.
///
/// Package names must only contain alphanumeric characters, hyphens, underscores,
/// periods, colons (for versioning), and plus signs.
pub fn is_valid_package_name(package: &str) -> bool {
    if package.is_empty() {
        return false;
    }
    package
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+'))
}

/// Filter and return only valid package names from a list.
pub fn filter_valid_packages<'a>(packages: &[&'a str]) -> Vec<&'a str> {
    packages
        .iter()
        .copied()
        .filter(|p| is_valid_package_name(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dockerfile_builder_order() {
        let dockerfile = DockerfileBuilder::new("golang:latest")
            .block(vec![Instruction::Env {
                key: "GOPROXY".to_string(),
                value: "direct".to_string(),
            }])
            .workdir("/home/")
            .run("git clone https://github.com/gin-gonic/gin.git /home/gin")
            .blank()
            .build();

        assert_eq!(
            dockerfile,
            "FROM golang:latest\n\nENV GOPROXY=\"direct\"\n\nWORKDIR /home/\nRUN git clone https://github.com/gin-gonic/gin.git /home/gin\n"
        );
    }

    #[test]
    fn test_empty_block_adds_nothing() {
        let dockerfile = DockerfileBuilder::new("ubuntu:22.04")
            .block(Vec::new())
            .run("true")
            .build();
        assert_eq!(dockerfile, "FROM ubuntu:22.04\n\nRUN true\n");
    }

    #[test]
    fn test_apt_install_filters_packages() {
        let dockerfile = DockerfileBuilder::new("ubuntu:22.04")
            .apt_install(&["git", "maven", "pkg; rm -rf /"])
            .build();
        assert!(dockerfile.contains("apt-get install -y --no-install-recommends git maven &&"));
        assert!(!dockerfile.contains("pkg;"));

        let dockerfile = DockerfileBuilder::new("ubuntu:22.04").apt_install(&[]).build();
        assert!(!dockerfile.contains("apt-get"));
    }

    #[test]
    fn test_copy_sources() {
        let dockerfile = DockerfileBuilder::new("base:1")
            .copy("fix.patch", "/home/")
            .copy("run.sh", "/home/")
            .build();
        assert_eq!(copy_sources(&dockerfile), vec!["fix.patch", "run.sh"]);
    }

    #[test]
    fn test_quote_env_value() {
        assert_eq!(quote_env_value("simple"), "simple");
        assert_eq!(quote_env_value("with\"quote"), "with\\\"quote");
        assert_eq!(quote_env_value("with\\backslash"), "with\\\\backslash");
    }

    #[test]
    fn test_env_references_are_expanded_by_docker() {
        let env = Instruction::Env {
            key: "PATH".to_string(),
            value: "/opt/go/bin:$PATH".to_string(),
        };
        assert_eq!(env.to_string(), "ENV PATH=\"/opt/go/bin:$PATH\"");

        let braced = Instruction::Env {
            key: "GOPATH".to_string(),
            value: "${HOME}/go".to_string(),
        };
        assert_eq!(braced.to_string(), "ENV GOPATH=\"${HOME}/go\"");
    }

    #[test]
    fn test_is_valid_package_name() {
        assert!(is_valid_package_name("openjdk-11-jdk"));
        assert!(is_valid_package_name("g++"));
        assert!(is_valid_package_name("package:amd64"));

        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name("pkg && whoami"));
        assert!(!is_valid_package_name("$(malicious)"));
        assert!(!is_valid_package_name("pkg\nmalicious"));
    }
}
