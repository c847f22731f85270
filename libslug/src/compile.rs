use crate::archive::{self, ArchiveError, ArchiveFormat};
use crate::build::{Build, BuildRoot};
use crate::buildpack::{Buildpack, BuildpackError, RunOutcome};
use crate::output;
use crate::write::Sink;
use libslug_data::manifest::CompileManifest;
use libslug_data::procfile::{read_procfile, ProcfileError, PROCFILE_NAME};
use libslug_data::result::CompileResult;
use std::fs;

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("No buildpacks to compile the application with")]
    NoBuildpacks,

    #[error("Buildpack {url} declined the application")]
    BuildpackDeclined { url: String },

    #[error(transparent)]
    Buildpack(#[from] BuildpackError),

    #[error(transparent)]
    Procfile(#[from] ProcfileError),

    #[error("Could not package slug: {0}")]
    Package(#[source] ArchiveError),
}

/// Runs the buildpacks of `manifest`, strictly in order, against a prepared build root and
/// packages the resulting application directory as the slug.
///
/// The first buildpack to decline the application ends the compilation, later buildpacks are
/// neither detected nor compiled.
pub fn compile(
    build_root: &BuildRoot,
    manifest: &CompileManifest,
    stdout: Sink,
    stderr: Sink,
) -> Result<CompileResult, CompileError> {
    if manifest.buildpacks.is_empty() {
        return Err(CompileError::NoBuildpacks);
    }

    let build = Build::new(
        build_root,
        manifest.stack.clone(),
        manifest.source_version.clone(),
        stdout,
        stderr,
    );

    let buildpacks_dir = build_root.buildpacks_dir();
    let mut compiled: Vec<Buildpack> = Vec::with_capacity(manifest.buildpacks.len());
    let mut detected_buildpack = String::new();

    for resolved in &manifest.buildpacks {
        let mut buildpack = Buildpack::from_resolved(resolved, &buildpacks_dir);
        log::info!("Running buildpack {}", buildpack.url());

        match buildpack.run(&compiled, &build)? {
            RunOutcome::Compiled { name } => detected_buildpack = name,
            RunOutcome::Declined => {
                return Err(CompileError::BuildpackDeclined {
                    url: buildpack.url().to_string(),
                });
            }
        }

        compiled.push(buildpack);
    }

    output::header(build.stdout.clone(), "Discovering process types");
    let process_types = read_procfile(build.app_dir.join(PROCFILE_NAME))?;
    output::info(
        build.stdout.clone(),
        format!(
            "Procfile declares types -> {}",
            process_types
                .keys()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    );

    output::header(build.stdout.clone(), "Compressing");
    let slug_path = build_root.slug_path();
    let digest = archive::pack_to_file(&build.app_dir, ArchiveFormat::TarGz, &slug_path)
        .map_err(CompileError::Package)?;

    if let Ok(metadata) = fs::metadata(&slug_path) {
        #[allow(clippy::cast_precision_loss)]
        let size = metadata.len() as f64 / (1024.0 * 1024.0);
        output::info(build.stdout.clone(), format!("Done: {size:.1}M"));
    }

    Ok(CompileResult {
        slug_path,
        slug_checksum: format!("sha256:{digest}"),
        source_version: manifest.source_version.clone(),
        detected_buildpack,
        stack: manifest.stack.clone(),
        process_types,
    })
}
