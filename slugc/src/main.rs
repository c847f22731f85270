#![doc = include_str!("../README.md")]
#![warn(clippy::pedantic)]
#![warn(unused_crate_dependencies)]
// This lint is too noisy and enforces a style that reduces readability in many cases.
#![allow(clippy::module_name_repetitions)]

mod cli;
mod exit_code;
mod logging;

use crate::cli::{Cli, CompileArgs, PrepareArgs, SlugcSubcommand};
use crate::logging::log_error;
use clap::Parser;
use libslug::source::Endpoints;
use libslug::write::Sink;
use libslug::{compile, prepare, BuildRoot, CompileError, PrepareError};
use libslug_data::buildpack::BuildpackReference;
use libslug_data::config_vars::ConfigVars;
use libslug_data::manifest::CompileManifest;
use libslug_data::toml_file::{read_toml_file, write_toml_file, TomlFileError};
use log::info;

// Suppress warnings due to the `unused_crate_dependencies` lint not handling integration tests well.
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use indoc as _;
#[cfg(test)]
use tempfile as _;

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        SlugcSubcommand::Prepare(args) => run_prepare_command(args),
        SlugcSubcommand::Compile(args) => run_compile_command(&args),
    };

    if let Err(error) = result {
        let (header, exit_code) = match error {
            SlugcError::Prepare(_) => ("Failed to prepare build", exit_code::BUILD_FAILED),
            SlugcError::Compile(_) => ("Failed to compile slug", exit_code::BUILD_FAILED),
            SlugcError::ReadManifest(_) | SlugcError::WriteManifest(_) => {
                ("Invalid build directory", exit_code::UNSPECIFIED_ERROR)
            }
            SlugcError::WriteResult(_) => {
                ("Could not write compile result", exit_code::UNSPECIFIED_ERROR)
            }
        };

        log_error(header, error.to_string());
        std::process::exit(exit_code);
    }
}

#[derive(thiserror::Error, Debug)]
enum SlugcError {
    #[error(transparent)]
    Prepare(PrepareError),
    #[error(transparent)]
    Compile(CompileError),
    #[error("Could not read build manifest: {0}")]
    ReadManifest(TomlFileError),
    #[error("Could not write build manifest: {0}")]
    WriteManifest(TomlFileError),
    #[error("Could not write compile result: {0}")]
    WriteResult(TomlFileError),
}

fn run_prepare_command(args: PrepareArgs) -> Result<(), SlugcError> {
    let build_root = BuildRoot::new(args.build_dir);

    let defaults = Endpoints::default();
    let endpoints = Endpoints {
        registry_base_url: args.registry_url.unwrap_or(defaults.registry_base_url),
        github_base_url: args.github_url.unwrap_or(defaults.github_base_url),
    };

    let buildpacks = args
        .buildpacks
        .into_iter()
        .map(|url| BuildpackReference::new(url.clone(), url))
        .collect::<Vec<_>>();

    let manifest = prepare(build_root.clone())
        .source_dir(args.source_dir)
        .application(args.app)
        .stack(args.stack)
        .source_version(args.source_version)
        .config_vars(args.config_vars.into_iter().collect::<ConfigVars>())
        .buildpacks(buildpacks)
        .endpoints(endpoints)
        .download_concurrency(args.download_concurrency)
        .stdout(Sink::stdout())
        .call_sync()
        .map_err(SlugcError::Prepare)?;

    write_toml_file(&manifest, build_root.manifest_path()).map_err(SlugcError::WriteManifest)?;

    info!(
        "Prepared {} buildpack(s), wrote manifest to {}",
        manifest.buildpacks.len(),
        build_root.manifest_path().display()
    );

    Ok(())
}

fn run_compile_command(args: &CompileArgs) -> Result<(), SlugcError> {
    let build_root = BuildRoot::new(&args.build_dir);

    let manifest = read_toml_file::<CompileManifest>(build_root.manifest_path())
        .map_err(SlugcError::ReadManifest)?;

    let result = compile(&build_root, &manifest, Sink::stdout(), Sink::stderr())
        .map_err(SlugcError::Compile)?;

    write_toml_file(&result, build_root.result_path()).map_err(SlugcError::WriteResult)?;

    info!(
        "Compiled slug {} ({}), wrote result to {}",
        result.slug_path.display(),
        result.slug_checksum,
        build_root.result_path().display()
    );

    Ok(())
}

fn setup_logging(verbose: u8, quiet: bool) {
    if let Err(error) = stderrlog::new()
        .verbosity(2 + usize::from(verbose)) // LevelFilter::Info and up
        .quiet(quiet)
        .init()
    {
        eprintln!("Unable to initialize logger: {error}");
        std::process::exit(exit_code::UNSPECIFIED_ERROR);
    }
}
