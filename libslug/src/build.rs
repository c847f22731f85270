use crate::write::Sink;
use libslug_data::manifest::MANIFEST_FILE_NAME;
use libslug_data::result::RESULT_FILE_NAME;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const ENV_DIR_NAME: &str = "env";
const BUILDPACKS_DIR_NAME: &str = "buildpacks";
const APP_DIR_NAME: &str = "app";
const CACHE_DIR_NAME: &str = "cache";
const SLUG_FILE_NAME: &str = "app.tgz";

/// The isolated directory tree of a single build.
///
/// ```text
/// <root>/
///   env/<NAME>           one file per config var, holding the raw value
///   buildpacks/<sha256>/ one extracted buildpack per source URI
///   app/                 the filtered copy of the application source
///   cache/               handed to buildpacks as their cache directory
///   manifest.toml
///   app.tgz              the slug
///   result.toml
/// ```
///
/// A build root is owned by exactly one build and is never cleaned up by this crate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BuildRoot {
    root: PathBuf,
}

impl BuildRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the build root and all of its subdirectories.
    pub fn create(root: impl Into<PathBuf>) -> io::Result<Self> {
        let build_root = Self::new(root);

        for dir in [
            build_root.env_dir(),
            build_root.buildpacks_dir(),
            build_root.app_dir(),
            build_root.cache_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }

        Ok(build_root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_dir(&self) -> PathBuf {
        self.root.join(ENV_DIR_NAME)
    }

    pub fn buildpacks_dir(&self) -> PathBuf {
        self.root.join(BUILDPACKS_DIR_NAME)
    }

    pub fn app_dir(&self) -> PathBuf {
        self.root.join(APP_DIR_NAME)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR_NAME)
    }

    pub fn slug_path(&self) -> PathBuf {
        self.root.join(SLUG_FILE_NAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn result_path(&self) -> PathBuf {
        self.root.join(RESULT_FILE_NAME)
    }
}

/// Context passed to every buildpack invocation of a build.
#[derive(Debug, Clone)]
pub struct Build {
    pub app_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub env_dir: PathBuf,
    pub stack: String,
    pub source_version: String,
    pub stdout: Sink,
    pub stderr: Sink,
}

impl Build {
    pub fn new(
        build_root: &BuildRoot,
        stack: impl Into<String>,
        source_version: impl Into<String>,
        stdout: Sink,
        stderr: Sink,
    ) -> Self {
        Self {
            app_dir: build_root.app_dir(),
            cache_dir: build_root.cache_dir(),
            env_dir: build_root.env_dir(),
            stack: stack.into(),
            source_version: source_version.into(),
            stdout,
            stderr,
        }
    }
}
