//! Image chains.
//!
//! Every pull request is evaluated inside an image built from a short,
//! linear chain of layers. Each layer is an [`Image`]: it names its parent
//! (another `Image` or an external reference such as `golang:latest`), the
//! files it stages into its build context, and the Dockerfile that turns
//! the parent into this layer.
//!
//! Images are built fresh for every `(PullRequest, Config)` pair and are
//! only ever rendered, never mutated.

use tracing::debug;

use crate::config::Config;
use crate::dataset::PullRequest;
use crate::docker::Instruction;
use crate::error::ImageError;

pub mod context;
pub mod layers;
pub mod scripts;
pub mod toolchain;

pub use context::{materialize, materialize_chain, LayerContext};
pub use layers::{BaseImage, PrImage};
pub use toolchain::{HelperScript, Toolchain};

/// Upper bound on the number of layers in one chain.
pub const MAX_CHAIN_DEPTH: usize = 8;

/// One file staged into a build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Directory relative to the context root (`.` for the root).
    pub dir: String,
    pub name: String,
    pub content: String,
}

impl File {
    pub fn new(dir: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Path of the file relative to the context root, without a leading `./`.
    pub fn context_path(&self) -> String {
        match self.dir.trim_matches('/') {
            "" | "." => self.name.clone(),
            dir => format!("{}/{}", dir.trim_start_matches("./"), self.name),
        }
    }

    pub fn is_shell_script(&self) -> bool {
        self.name.ends_with(".sh")
    }
}

/// Parent of an image layer.
pub enum Dependency {
    /// An image pulled from a registry, e.g. `ubuntu:22.04`.
    External(String),
    /// Another layer of the same chain.
    Image(Box<dyn Image>),
}

impl Dependency {
    /// Reference usable in a `FROM` instruction.
    pub fn reference(&self) -> String {
        match self {
            Self::External(reference) => reference.clone(),
            Self::Image(image) => image.image_full_name(),
        }
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::External(reference) => f.debug_tuple("External").field(reference).finish(),
            Self::Image(image) => f.debug_tuple("Image").field(&image.image_full_name()).finish(),
        }
    }
}

/// A layer of an evaluation image.
pub trait Image: Send + Sync {
    fn pr(&self) -> &PullRequest;

    fn config(&self) -> &Config;

    fn dependency(&self) -> Dependency;

    /// Repository part of the image reference, `<prefix>/<org>_m_<repo>`.
    fn image_name(&self) -> String {
        format!(
            "{}/{}_m_{}",
            self.config().image_prefix,
            self.pr().org(),
            self.pr().repo()
        )
        .to_lowercase()
    }

    fn image_tag(&self) -> String;

    /// Name of this layer's build-context directory.
    fn workdir(&self) -> String;

    fn files(&self) -> Vec<File>;

    fn dockerfile(&self) -> String;

    /// Name of a directory copied from the staged sources into the build
    /// context, if the layer needs one.
    fn staged_source(&self) -> Option<String> {
        None
    }

    fn image_full_name(&self) -> String {
        format!("{}:{}", self.image_name(), self.image_tag())
    }
}

/// `ENV` block emitted at the top of every layer.
pub fn global_env_block(config: &Config) -> Vec<Instruction> {
    config
        .global_env
        .iter()
        .map(|(key, value)| Instruction::Env {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

/// `ENV` block emitted at the bottom of every layer; resets the global
/// environment when `clear_env` is set.
pub fn clear_env_block(config: &Config) -> Vec<Instruction> {
    if !config.clear_env {
        return Vec::new();
    }
    config
        .global_env
        .keys()
        .map(|key| Instruction::Env {
            key: key.clone(),
            value: String::new(),
        })
        .collect()
}

/// A resolved chain: the external reference it starts from and its layers,
/// parent first.
pub struct ImageChain {
    pub external: String,
    pub layers: Vec<Box<dyn Image>>,
}

impl ImageChain {
    /// The layer the evaluation runs in.
    pub fn terminal(&self) -> Option<&dyn Image> {
        self.layers.last().map(|image| image.as_ref())
    }

    pub fn image_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.image_full_name()).collect()
    }
}

/// Walks `dependency()` from `terminal` down to the external base reference.
pub fn resolve_chain(terminal: Box<dyn Image>) -> Result<ImageChain, ImageError> {
    let terminal_name = terminal.image_full_name();
    let mut layers: Vec<Box<dyn Image>> = Vec::new();
    let mut current = terminal;

    let external = loop {
        let dependency = current.dependency();
        layers.push(current);
        match dependency {
            Dependency::External(reference) => break reference,
            Dependency::Image(parent) => {
                if layers.len() >= MAX_CHAIN_DEPTH {
                    return Err(ImageError::ChainTooDeep {
                        image: terminal_name,
                        max: MAX_CHAIN_DEPTH,
                    });
                }
                current = parent;
            }
        }
    };

    layers.reverse();
    debug!(image = %terminal_name, external = %external, depth = layers.len(), "Resolved image chain");
    Ok(ImageChain { external, layers })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Looping {
        pr: PullRequest,
        config: Config,
        depth: usize,
    }

    impl Image for Looping {
        fn pr(&self) -> &PullRequest {
            &self.pr
        }

        fn config(&self) -> &Config {
            &self.config
        }

        fn dependency(&self) -> Dependency {
            Dependency::Image(Box::new(Looping {
                pr: self.pr.clone(),
                config: self.config.clone(),
                depth: self.depth + 1,
            }))
        }

        fn image_tag(&self) -> String {
            format!("layer-{}", self.depth)
        }

        fn workdir(&self) -> String {
            self.image_tag()
        }

        fn files(&self) -> Vec<File> {
            Vec::new()
        }

        fn dockerfile(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn test_unbounded_chain_is_rejected() {
        let image = Looping {
            pr: PullRequest::new("octo", "cat", 1, "abc", "", ""),
            config: Config::new(true),
            depth: 0,
        };
        let err = resolve_chain(Box::new(image)).err().unwrap();
        assert!(matches!(
            err,
            ImageError::ChainTooDeep {
                max: MAX_CHAIN_DEPTH,
                ..
            }
        ));
    }

    #[test]
    fn test_image_name_is_lowercased() {
        let image = Looping {
            pr: PullRequest::new("BurntSushi", "ripgrep", 7, "abc", "", ""),
            config: Config::new(true),
            depth: 0,
        };
        assert_eq!(image.image_name(), "swe-harness/burntsushi_m_ripgrep");
        assert_eq!(
            image.image_full_name(),
            "swe-harness/burntsushi_m_ripgrep:layer-0"
        );
    }

    #[test]
    fn test_file_context_path() {
        assert_eq!(File::new(".", "run.sh", "").context_path(), "run.sh");
        assert_eq!(File::new("./ci", "a.sh", "").context_path(), "ci/a.sh");
        assert!(File::new(".", "run.sh", "").is_shell_script());
        assert!(!File::new(".", "fix.patch", "").is_shell_script());
    }

    #[test]
    fn test_env_blocks() {
        let config = Config::new(true).with_global_env("HTTP_PROXY", "http://proxy:3128");
        assert_eq!(global_env_block(&config).len(), 1);
        assert!(clear_env_block(&config).is_empty());

        let config = config.with_clear_env(true);
        assert_eq!(
            clear_env_block(&config),
            vec![Instruction::Env {
                key: "HTTP_PROXY".to_string(),
                value: String::new(),
            }]
        );
    }
}
