//! Dockerfile rendering for harness image layers.
//!
//! Layers are described as typed instruction lists and rendered here; the
//! image chain in [`crate::image`] decides which instructions each layer gets.

pub mod dockerfile;

pub use dockerfile::{
    copy_sources, filter_valid_packages, is_valid_package_name, DockerfileBuilder, Instruction,
};
