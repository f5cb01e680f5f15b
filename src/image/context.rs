//! Build-context materialization.
//!
//! A layer is written to `<workspace>/<org>/<repo>/images/<workdir>/` as a
//! `Dockerfile` plus every staged file. Nothing is written until the layer
//! passes validation, so a broken layer never leaves a half-built context
//! that a container engine could pick up.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::scripts::{check_patch_order, patches_to_apply, FIX_PATCH, FIX_RUN_SCRIPT, TEST_PATCH};
use super::{File, Image, ImageChain};
use crate::docker::copy_sources;
use crate::error::ImageError;

/// A build context on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerContext {
    /// Full `name:tag` the context builds.
    pub image: String,
    pub dir: PathBuf,
}

/// Context directory of one layer.
pub fn layer_context_dir(workspace: &Path, org: &str, repo: &str, workdir: &str) -> PathBuf {
    workspace.join(org).join(repo).join("images").join(workdir)
}

fn validate_file(image: &str, file: &File) -> Result<(), ImageError> {
    let invalid = |reason: &str| ImageError::InvalidFileName {
        image: image.to_string(),
        name: file.context_path(),
        reason: reason.to_string(),
    };

    let name = file.name.as_str();
    if name.is_empty() || name == "." || name == ".." {
        return Err(invalid("file name is empty or a relative directory"));
    }
    if name.contains(['/', '\\', '\0']) || name.chars().any(char::is_whitespace) {
        return Err(invalid("file name must be a single path component without whitespace"));
    }
    if name == "Dockerfile" {
        return Err(invalid("file name collides with the generated Dockerfile"));
    }

    let dir = Path::new(&file.dir);
    if dir.is_absolute()
        || dir
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(invalid("directory must stay inside the build context"));
    }
    Ok(())
}

/// Validates a layer and writes its build context to `context_dir`.
///
/// `source_root` holds staged sources as `<source_root>/<org>/<repo>`; it is
/// only read for layers that copy a source tree.
pub fn materialize(
    image: &dyn Image,
    context_dir: &Path,
    source_root: &Path,
) -> Result<LayerContext, ImageError> {
    let name = image.image_full_name();
    let files = image.files();

    let mut staged: HashSet<String> = HashSet::new();
    for file in &files {
        validate_file(&name, file)?;
        if !staged.insert(file.context_path()) {
            return Err(ImageError::DuplicateFile {
                image: name,
                name: file.context_path(),
            });
        }
    }

    let source = image.staged_source();
    let dockerfile = image.dockerfile();
    for src in copy_sources(&dockerfile) {
        let src = src.trim_start_matches("./").trim_end_matches('/');
        if !staged.contains(src) && source.as_deref() != Some(src) {
            return Err(ImageError::MissingFile {
                image: name,
                name: src.to_string(),
            });
        }
    }

    if let Some(fix_run) = files.iter().find(|f| f.name == FIX_RUN_SCRIPT) {
        let staged_patch = |patch: &str| {
            files
                .iter()
                .find(|f| f.name == patch)
                .map_or("", |f| f.content.as_str())
        };
        let expected = patches_to_apply(staged_patch(TEST_PATCH), staged_patch(FIX_PATCH));
        check_patch_order(&name, &fix_run.content, &expected)?;
    }

    let source_dir = match &source {
        Some(_) => {
            let pr = image.pr();
            let dir = source_root.join(pr.org()).join(pr.repo());
            if !dir.is_dir() {
                return Err(ImageError::MissingSource {
                    repo: pr.full_repo(),
                    path: dir.display().to_string(),
                });
            }
            Some(dir)
        }
        None => None,
    };

    if context_dir.exists() {
        fs::remove_dir_all(context_dir)?;
    }
    fs::create_dir_all(context_dir)?;
    fs::write(context_dir.join("Dockerfile"), &dockerfile)?;

    for file in &files {
        let path = context_dir.join(file.context_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &file.content)?;
    }

    if let (Some(from), Some(target)) = (source_dir, source) {
        copy_tree(&from, &context_dir.join(target))?;
    }

    debug!(image = %name, dir = %context_dir.display(), files = files.len(), "Materialized build context");
    Ok(LayerContext {
        image: name,
        dir: context_dir.to_path_buf(),
    })
}

/// Materializes every layer of a chain, parent first.
pub fn materialize_chain(
    chain: &ImageChain,
    workspace: &Path,
    source_root: &Path,
) -> Result<Vec<LayerContext>, ImageError> {
    let mut contexts = Vec::with_capacity(chain.layers.len());
    for layer in &chain.layers {
        let pr = layer.pr();
        let dir = layer_context_dir(workspace, pr.org(), pr.repo(), &layer.workdir());
        contexts.push(materialize(layer.as_ref(), &dir, source_root)?);
    }
    info!(
        base = %chain.external,
        layers = contexts.len(),
        "Build contexts ready"
    );
    Ok(contexts)
}

/// Recursively copies a source tree, `.git` included.
fn copy_tree(from: &Path, to: &Path) -> Result<(), ImageError> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), ImageError> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), ImageError> {
    fs::copy(link, target)?;
    Ok(())
}
