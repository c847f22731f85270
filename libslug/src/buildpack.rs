//! The classic buildpack protocol.
//!
//! A buildpack is a directory with two executables and an optional environment file:
//!
//! - `bin/detect <app_dir>` exits with `0` and prints the buildpack name if the buildpack applies
//!   to the application. Any other exit code declines the application.
//! - `bin/compile <app_dir> <cache_dir> <env_dir>` transforms the application in place.
//! - `export` is sourced before the `bin/compile` of every buildpack that runs after this one.

use crate::build::Build;
use crate::command::CommandExt;
use crate::output;
use crate::write::indented;
use libslug_data::buildpack::ResolvedBuildpack;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

const DETECT_PATH: &str = "bin/detect";
const COMPILE_PATH: &str = "bin/compile";
const EXPORT_FILE_NAME: &str = "export";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BuildpackState {
    Undetected,
    Detected,
    Compiled,
    Failed,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// `bin/detect` declined the application, `bin/compile` did not run.
    Declined,
    Compiled { name: String },
}

#[derive(thiserror::Error, Debug)]
pub enum BuildpackError {
    #[error("Could not run bin/detect of buildpack {url}: {source}")]
    Detect {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("Could not run bin/compile of buildpack {url}: {source}")]
    CompileSpawn {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("bin/compile of buildpack {url} failed: {status}")]
    CompileFailed { url: String, status: ExitStatus },
}

/// An extracted buildpack and where it is in the detect/compile lifecycle.
#[derive(Debug, Clone)]
pub struct Buildpack {
    url: String,
    dir: PathBuf,
    name: Option<String>,
    state: BuildpackState,
}

impl Buildpack {
    pub fn new(url: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dir: dir.into(),
            name: None,
            state: BuildpackState::Undetected,
        }
    }

    /// Creates a buildpack from a manifest entry, resolving its directory below `buildpacks_dir`.
    pub fn from_resolved(resolved: &ResolvedBuildpack, buildpacks_dir: &Path) -> Self {
        Self::new(resolved.url.clone(), buildpacks_dir.join(&resolved.directory))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The name printed by `bin/detect`, available once the buildpack has been detected.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> BuildpackState {
        self.state
    }

    /// The path of the `export` file, if the buildpack has one.
    pub fn export_path(&self) -> Option<PathBuf> {
        Some(self.dir.join(EXPORT_FILE_NAME)).filter(|path| path.is_file())
    }

    /// Runs `bin/detect` and returns whether the buildpack applies to the application.
    ///
    /// A non-zero exit code is not an error. Failing to launch `bin/detect` is.
    pub fn detect(&mut self, build: &Build) -> Result<bool, BuildpackError> {
        let result = self
            .command(DETECT_PATH, build)
            .arg(&build.app_dir)
            .run_and_capture_stdout(indented(build.stderr.clone()));

        let (status, stdout) = match result {
            Ok(output) => output,
            Err(source) => {
                self.state = BuildpackState::Failed;
                return Err(BuildpackError::Detect {
                    url: self.url.clone(),
                    source,
                });
            }
        };

        if status.success() {
            let name = String::from_utf8_lossy(&stdout).trim().to_string();
            // Some buildpacks detect without printing anything.
            self.name = Some(if name.is_empty() { self.url.clone() } else { name });
            self.state = BuildpackState::Detected;
            Ok(true)
        } else {
            log::debug!("Buildpack {} declined the application: {status}", self.url);
            self.state = BuildpackState::Undetected;
            Ok(false)
        }
    }

    /// Runs `bin/compile`, after sourcing the `export` files of the `previous` buildpacks in
    /// order, all within the same shell.
    ///
    /// Output of the compile step is streamed, indented, to the build's sinks.
    pub fn compile(&mut self, previous: &[Buildpack], build: &Build) -> Result<(), BuildpackError> {
        let script = previous
            .iter()
            .filter_map(Buildpack::export_path)
            .map(|export_path| format!(". {}\n", shell_escape(&export_path.to_string_lossy())))
            .chain(std::iter::once(format!(
                "exec {} \"$@\"",
                shell_escape(&self.dir.join(COMPILE_PATH).to_string_lossy())
            )))
            .collect::<String>();

        log::debug!("Compiling buildpack {} with script: {script}", self.url);

        let result = shell_command(&script, build)
            .args([&build.app_dir, &build.cache_dir, &build.env_dir])
            .run_and_write_streams(indented(build.stdout.clone()), indented(build.stderr.clone()));

        match result {
            Ok(status) if status.success() => {
                self.state = BuildpackState::Compiled;
                Ok(())
            }
            Ok(status) => {
                self.state = BuildpackState::Failed;
                Err(BuildpackError::CompileFailed {
                    url: self.url.clone(),
                    status,
                })
            }
            Err(source) => {
                self.state = BuildpackState::Failed;
                Err(BuildpackError::CompileSpawn {
                    url: self.url.clone(),
                    source,
                })
            }
        }
    }

    /// Detects and, if the buildpack applies, compiles the application.
    pub fn run(
        &mut self,
        previous: &[Buildpack],
        build: &Build,
    ) -> Result<RunOutcome, BuildpackError> {
        if !self.detect(build)? {
            return Ok(RunOutcome::Declined);
        }

        let name = self.name.clone().unwrap_or_else(|| self.url.clone());
        output::header(build.stdout.clone(), format!("{name} app detected"));
        output::header(build.stdout.clone(), "Compiling");

        self.compile(previous, build)?;

        Ok(RunOutcome::Compiled { name })
    }

    fn command(&self, executable: &str, build: &Build) -> Command {
        let mut command = Command::new(self.dir.join(executable));
        configure(&mut command, build);
        command
    }
}

fn shell_command(script: &str, build: &Build) -> Command {
    let mut command = Command::new("bash");
    // `$0` for the script, the remaining arguments end up in `$@`.
    command.args(["-c", script, "compile"]);
    configure(&mut command, build);
    command
}

fn configure(command: &mut Command, build: &Build) {
    command
        .current_dir(&build.app_dir)
        .env("STACK", &build.stack)
        .env("SOURCE_VERSION", &build.source_version);
}

fn shell_escape(value: &str) -> String {
    let mut escaped = String::from("'");
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}
