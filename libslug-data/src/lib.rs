#![doc = include_str!("../README.md")]
// Enable rustc and Clippy lints that are disabled by default.
// https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html#unused-crate-dependencies
#![warn(unused_crate_dependencies)]
// https://rust-lang.github.io/rust-clippy/stable/index.html
#![warn(clippy::pedantic)]
// This lint is too noisy and enforces a style that reduces readability in many cases.
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod buildpack;
pub mod config_vars;
pub mod manifest;
pub mod procfile;
pub mod result;
pub mod toml_file;

mod newtypes;

// Suppress warnings due to the `unused_crate_dependencies` lint not handling integration tests well.
#[cfg(test)]
use indoc as _;
#[cfg(test)]
use serde_test as _;
#[cfg(test)]
use tempfile as _;
