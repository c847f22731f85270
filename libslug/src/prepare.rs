//! Population of a build root ahead of compilation.
//!
//! Three independent units run concurrently: writing config vars to `env/`, downloading the
//! buildpacks to `buildpacks/` and copying the application source to `app/`. The first failing
//! unit cancels the others. Cancelled units stop starting new work, work already in flight (a
//! download, a file copy) is allowed to finish. The first error is returned once every unit has
//! returned. Partially populated build roots are left in place.

use crate::build::BuildRoot;
use crate::fs::copy_filtered;
use crate::http::ASYNC_RUNTIME;
use crate::output;
use crate::slugignore::{SlugIgnore, SlugIgnoreError};
use crate::source::{Endpoints, Source, SourceError};
use crate::write::Sink;
use libslug_data::buildpack::{BuildpackReference, ResolvedBuildpack};
use libslug_data::config_vars::ConfigVars;
use libslug_data::manifest::CompileManifest;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum PrepareError {
    #[error("Could not create build root at {0}: {1}")]
    BuildRoot(PathBuf, #[source] io::Error),

    #[error("Could not write config var to {path}: {source}")]
    WriteConfigVar {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    SlugIgnore(#[from] SlugIgnoreError),

    #[error("Could not copy application source from {source_dir}: {source}")]
    CopySource {
        source_dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Build directory {0} is the application source directory")]
    BuildRootIsSource(PathBuf),

    #[error(transparent)]
    Buildpack(#[from] SourceError),

    #[error("Prepare task did not complete: {0}")]
    Task(#[from] JoinError),

    #[error("Cancelled after another prepare step failed")]
    Cancelled,
}

enum PreparedUnit {
    ConfigVars,
    Buildpacks(Vec<ResolvedBuildpack>),
    Source,
}

/// Prepares `build_root` for compilation and returns the manifest describing it.
///
/// The buildpacks in the returned manifest are in the order they were given, independent of the
/// order their downloads complete in. References to the same source URI are downloaded once.
#[bon::builder]
pub async fn prepare(
    #[builder(start_fn)] //
    build_root: BuildRoot,
    #[builder(into)] //
    source_dir: PathBuf,
    #[builder(into)] //
    application: String,
    #[builder(into)] //
    stack: String,
    #[builder(into)] //
    source_version: String,
    #[builder(default)] //
    config_vars: ConfigVars,
    #[builder(default)] //
    buildpacks: Vec<BuildpackReference>,
    #[builder(default)] //
    endpoints: Endpoints,
    #[builder(default = DEFAULT_DOWNLOAD_CONCURRENCY)] //
    download_concurrency: usize,
    #[builder(default = Sink::null())] //
    stdout: Sink,
) -> Result<CompileManifest, PrepareError> {
    let build_root = BuildRoot::create(build_root.root())
        .map_err(|error| PrepareError::BuildRoot(build_root.root().to_path_buf(), error))?;

    log::info!(
        "Preparing build of {application} in {}",
        build_root.root().display()
    );

    let cancel = CancellationToken::new();
    let mut join_set = JoinSet::new();

    {
        let env_dir = build_root.env_dir();
        let cancel = cancel.clone();
        join_set.spawn_blocking(move || {
            write_config_vars(&env_dir, &config_vars, &cancel).map(|()| PreparedUnit::ConfigVars)
        });
    }

    {
        let buildpacks_dir = build_root.buildpacks_dir();
        let cancel = cancel.clone();
        let stdout = stdout.clone();
        join_set.spawn(async move {
            fetch_buildpacks(
                buildpacks,
                buildpacks_dir,
                endpoints,
                download_concurrency,
                stdout,
                cancel,
            )
            .await
            .map(PreparedUnit::Buildpacks)
        });
    }

    {
        let build_root = build_root.clone();
        let cancel = cancel.clone();
        join_set.spawn_blocking(move || {
            copy_source(&source_dir, &build_root, &cancel).map(|()| PreparedUnit::Source)
        });
    }

    let mut resolved_buildpacks = Vec::new();
    let mut first_error = None;

    while let Some(join_result) = join_set.join_next().await {
        match join_result.map_err(PrepareError::from).and_then(|result| result) {
            Ok(PreparedUnit::Buildpacks(resolved)) => resolved_buildpacks = resolved,
            Ok(PreparedUnit::ConfigVars | PreparedUnit::Source) => {}
            Err(error) => {
                cancel.cancel();
                record_error(&mut first_error, error);
            }
        }
    }

    if let Some(error) = first_error {
        return Err(error);
    }

    Ok(CompileManifest {
        application,
        stack,
        source_version,
        buildpacks: resolved_buildpacks,
    })
}

/// Extend the [`bon::builder`] for [`prepare`]
impl<State> PrepareBuilder<State>
where
    State: prepare_builder::State,
{
    pub fn call_sync(self) -> Result<CompileManifest, PrepareError>
    where
        State: prepare_builder::IsComplete,
    {
        ASYNC_RUNTIME.block_on(async { self.call().await })
    }
}

/// Keeps the first real error. Cancellations are only a consequence of it.
fn record_error(first_error: &mut Option<PrepareError>, error: PrepareError) {
    if matches!(first_error, None | Some(PrepareError::Cancelled)) {
        *first_error = Some(error);
    } else {
        log::debug!("Discarding subsequent prepare error: {error}");
    }
}

fn write_config_vars(
    env_dir: &Path,
    config_vars: &ConfigVars,
    cancel: &CancellationToken,
) -> Result<(), PrepareError> {
    for (name, value) in config_vars {
        if cancel.is_cancelled() {
            return Err(PrepareError::Cancelled);
        }

        let path = env_dir.join(name.as_str());
        fs::write(&path, value).map_err(|source| PrepareError::WriteConfigVar { path, source })?;
    }

    Ok(())
}

fn copy_source(
    source_dir: &Path,
    build_root: &BuildRoot,
    cancel: &CancellationToken,
) -> Result<(), PrepareError> {
    let copy_error = |source: io::Error| {
        if source.kind() == io::ErrorKind::Interrupted && cancel.is_cancelled() {
            PrepareError::Cancelled
        } else {
            PrepareError::CopySource {
                source_dir: source_dir.to_path_buf(),
                source,
            }
        }
    };

    let slug_ignore = SlugIgnore::for_source_dir(source_dir)?;
    let nested_build_root = nested_build_root(source_dir, build_root).map_err(copy_error)?;

    if nested_build_root
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        return Err(PrepareError::BuildRootIsSource(build_root.root().to_path_buf()));
    }

    copy_filtered(
        source_dir,
        &build_root.app_dir(),
        &|path: &Path| {
            nested_build_root.as_deref() == Some(path)
                || (!slug_ignore.is_empty() && slug_ignore.is_ignored(path))
        },
        &|| cancel.is_cancelled(),
    )
    .map_err(copy_error)
}

/// The path of the build root relative to `source_dir`, if the build root is located inside it.
fn nested_build_root(source_dir: &Path, build_root: &BuildRoot) -> io::Result<Option<PathBuf>> {
    let source_dir = fs::canonicalize(source_dir)?;
    let build_root = fs::canonicalize(build_root.root())?;

    Ok(build_root
        .strip_prefix(&source_dir)
        .ok()
        .map(Path::to_path_buf))
}

async fn fetch_buildpacks(
    buildpacks: Vec<BuildpackReference>,
    buildpacks_dir: PathBuf,
    endpoints: Endpoints,
    download_concurrency: usize,
    stdout: Sink,
    cancel: CancellationToken,
) -> Result<Vec<ResolvedBuildpack>, PrepareError> {
    if buildpacks.is_empty() {
        return Ok(Vec::new());
    }

    output::header(stdout.clone(), "Fetching buildpacks");

    // One download per distinct URI, `slots` maps every declared buildpack to its download.
    let mut sources: Vec<Source> = Vec::new();
    let mut slots = Vec::with_capacity(buildpacks.len());

    for buildpack in &buildpacks {
        let source = Source::parse(&buildpack.url)?;

        let slot = match sources.iter().position(|known| known.uri() == source.uri()) {
            Some(slot) => slot,
            None => {
                sources.push(source);
                sources.len() - 1
            }
        };

        slots.push(slot);
    }

    // Cancelled by siblings through the parent token, or locally by a failed download.
    let cancel = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(download_concurrency.max(1)));
    let endpoints = Arc::new(endpoints);
    let buildpacks_dir = Arc::new(buildpacks_dir);
    let source_count = sources.len();
    let mut join_set = JoinSet::new();

    for (index, source) in sources.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let endpoints = Arc::clone(&endpoints);
        let buildpacks_dir = Arc::clone(&buildpacks_dir);
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };

            let Some(_permit) = permit else {
                return (index, Err(PrepareError::Cancelled));
            };

            let result = source
                .download(&endpoints, &buildpacks_dir)
                .await
                .map_err(PrepareError::from);

            (index, result)
        });
    }

    let mut resolved = vec![None; source_count];
    let mut first_error = None;

    while let Some(join_result) = join_set.join_next().await {
        match join_result {
            Ok((index, Ok(resolved_buildpack))) => {
                if let Some(slot) = resolved.get_mut(index) {
                    *slot = Some(resolved_buildpack);
                }
            }
            Ok((_, Err(error))) => {
                cancel.cancel();
                record_error(&mut first_error, error);
            }
            Err(join_error) => {
                cancel.cancel();
                record_error(&mut first_error, PrepareError::Task(join_error));
            }
        }
    }

    if let Some(error) = first_error {
        return Err(error);
    }

    let resolved_buildpacks = slots
        .iter()
        .map(|&slot| resolved.get(slot).cloned().flatten())
        .collect::<Option<Vec<_>>>()
        .ok_or(PrepareError::Cancelled)?;

    for resolved_buildpack in &resolved_buildpacks {
        output::info(stdout.clone(), &resolved_buildpack.url);
    }

    Ok(resolved_buildpacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn record_error_prefers_real_errors() {
        let mut first_error = None;

        record_error(&mut first_error, PrepareError::Cancelled);
        record_error(
            &mut first_error,
            PrepareError::Buildpack(SourceError::Unsupported(String::from("heroku/ruby"))),
        );
        record_error(&mut first_error, PrepareError::Cancelled);

        assert!(matches!(
            first_error,
            Some(PrepareError::Buildpack(SourceError::Unsupported(_)))
        ));
    }

    #[test]
    fn write_config_vars_without_trailing_newline() {
        let env_dir = tempdir().unwrap();
        let config_vars = ConfigVars::from([
            ("PING".parse().unwrap(), String::from("PONG")),
            ("EMPTY".parse().unwrap(), String::new()),
        ]);

        write_config_vars(env_dir.path(), &config_vars, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(env_dir.path().join("PING")).unwrap(), b"PONG");
        assert_eq!(fs::read(env_dir.path().join("EMPTY")).unwrap(), b"");
    }

    #[test]
    fn write_config_vars_stops_when_cancelled() {
        let env_dir = tempdir().unwrap();
        let config_vars = ConfigVars::from([("PING".parse().unwrap(), String::from("PONG"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            write_config_vars(env_dir.path(), &config_vars, &cancel),
            Err(PrepareError::Cancelled)
        ));
        assert!(!env_dir.path().join("PING").exists());
    }

    #[test]
    fn copy_source_applies_slugignore() {
        let source_dir = tempdir().unwrap();
        let build_dir = tempdir().unwrap();
        let build_root = BuildRoot::create(build_dir.path()).unwrap();

        for file in ["keep-me/a.txt", "vendor/drop-me/b.txt", "vendor/keep-this/c.txt"] {
            let path = source_dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file).unwrap();
        }
        fs::write(source_dir.path().join("bin"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(
            source_dir.path().join("bin"),
            fs::Permissions::from_mode(0o700),
        )
        .unwrap();
        fs::write(
            source_dir.path().join(".slugignore"),
            "/keep-me\nvendor/drop-me\n",
        )
        .unwrap();

        copy_source(source_dir.path(), &build_root, &CancellationToken::new()).unwrap();

        let app_dir = build_root.app_dir();
        assert!(!app_dir.join("keep-me/a.txt").exists());
        assert!(!app_dir.join("vendor/drop-me").exists());
        assert!(app_dir.join("vendor/keep-this/c.txt").is_file());
        assert_eq!(
            fs::metadata(app_dir.join("bin"))
                .unwrap()
                .permissions()
                .mode()
                & 0o777,
            0o700
        );
    }

    #[test]
    fn copy_source_rejects_invalid_slugignore() {
        let source_dir = tempdir().unwrap();
        let build_dir = tempdir().unwrap();
        let build_root = BuildRoot::create(build_dir.path()).unwrap();
        fs::write(source_dir.path().join(".slugignore"), "[\n").unwrap();

        assert!(matches!(
            copy_source(source_dir.path(), &build_root, &CancellationToken::new()),
            Err(PrepareError::SlugIgnore(SlugIgnoreError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn prepare_with_build_dir_inside_source_dir() {
        let source_dir = tempdir().unwrap();
        fs::write(source_dir.path().join("Procfile"), "web: bin/server\n").unwrap();
        fs::create_dir_all(source_dir.path().join("lib")).unwrap();
        fs::write(source_dir.path().join("lib/app.rb"), "puts 1\n").unwrap();

        let build_root = BuildRoot::new(source_dir.path().join("build"));

        prepare(build_root.clone())
            .source_dir(source_dir.path())
            .application("compiler-test")
            .stack("heroku-24")
            .source_version("8c1f3e2")
            .call_sync()
            .unwrap();

        let app_dir = build_root.app_dir();
        assert!(app_dir.join("Procfile").is_file());
        assert!(app_dir.join("lib/app.rb").is_file());
        assert!(!app_dir.join("build").exists());
    }

    #[test]
    fn prepare_with_build_dir_equal_to_source_dir() {
        let source_dir = tempdir().unwrap();
        fs::write(source_dir.path().join("Procfile"), "web: bin/server\n").unwrap();

        let error = prepare(BuildRoot::new(source_dir.path()))
            .source_dir(source_dir.path())
            .application("compiler-test")
            .stack("heroku-24")
            .source_version("8c1f3e2")
            .call_sync()
            .unwrap_err();

        assert!(matches!(error, PrepareError::BuildRootIsSource(_)));
    }

    #[test]
    fn unsupported_buildpack_fails_prepare_after_other_units_finish() {
        let temp_dir = tempdir().unwrap();
        let source_dir = temp_dir.path().join("source");
        fs::create_dir_all(&source_dir).unwrap();
        fs::write(source_dir.join("Procfile"), "web: bin/server\n").unwrap();

        let build_root = BuildRoot::new(temp_dir.path().join("build"));

        let error = prepare(build_root.clone())
            .source_dir(&source_dir)
            .application("compiler-test")
            .stack("heroku-24")
            .source_version("8c1f3e2")
            .buildpacks(vec![BuildpackReference::new(
                "ruby",
                "git@github.com:heroku/heroku-buildpack-ruby.git",
            )])
            .call_sync()
            .unwrap_err();

        assert!(matches!(
            error,
            PrepareError::Buildpack(SourceError::Unsupported(_))
        ));
        assert!(build_root.env_dir().is_dir());
        assert!(build_root.app_dir().is_dir());
    }

    #[test]
    fn prepare_without_buildpacks() {
        let temp_dir = tempdir().unwrap();
        let source_dir = temp_dir.path().join("source");
        fs::create_dir_all(&source_dir).unwrap();
        fs::write(source_dir.join("Procfile"), "web: bin/server\n").unwrap();

        let build_root = BuildRoot::new(temp_dir.path().join("build"));

        let manifest = prepare(build_root.clone())
            .source_dir(&source_dir)
            .application("compiler-test")
            .stack("heroku-24")
            .source_version("8c1f3e2")
            .call_sync()
            .unwrap();

        assert_eq!(manifest.application, "compiler-test");
        assert!(manifest.buildpacks.is_empty());
        assert_eq!(
            fs::read_to_string(build_root.app_dir().join("Procfile")).unwrap(),
            "web: bin/server\n"
        );
    }
}
