use clap::{ArgAction, Parser, Subcommand};
use libslug_data::config_vars::ConfigVarName;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Log more, can be repeated
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: SlugcSubcommand,
}

#[derive(Subcommand)]
pub(crate) enum SlugcSubcommand {
    /// Populates a build directory with config vars, buildpacks and the application source
    Prepare(PrepareArgs),
    /// Runs the buildpacks of a prepared build directory and packages the slug
    Compile(CompileArgs),
}

#[derive(Parser)]
pub(crate) struct PrepareArgs {
    /// Directory containing the application source
    #[arg(long, env = "SLUG_SOURCE_DIR")]
    pub source_dir: PathBuf,
    /// Directory to prepare the build in
    #[arg(long, env = "SLUG_BUILD_DIR")]
    pub build_dir: PathBuf,
    /// Name of the application being built
    #[arg(long, env = "SLUG_APP")]
    pub app: String,
    /// Stack the slug is built for, exported to buildpacks as STACK
    #[arg(long, env = "SLUG_STACK")]
    pub stack: String,
    /// Version of the source, exported to buildpacks as SOURCE_VERSION
    #[arg(long, env = "SLUG_SOURCE_VERSION")]
    pub source_version: String,
    /// Buildpack source URI, either urn:buildpack:<name> or a GitHub repository URL. Repeat in
    /// execution order
    #[arg(long = "buildpack", value_name = "URI", required = true)]
    pub buildpacks: Vec<String>,
    /// Config var to expose to buildpacks, can be repeated
    #[arg(long = "config", value_name = "NAME=VALUE", value_parser = parse_config_var)]
    pub config_vars: Vec<(ConfigVarName, String)>,
    /// Base URL of the buildpack registry
    #[arg(long, env = "SLUG_REGISTRY_URL")]
    pub registry_url: Option<String>,
    /// Base URL that GitHub tarballs are downloaded from
    #[arg(long, env = "SLUG_GITHUB_URL")]
    pub github_url: Option<String>,
    /// Maximum number of concurrent buildpack downloads
    #[arg(long, env = "SLUG_DOWNLOAD_CONCURRENCY", default_value_t = 4)]
    pub download_concurrency: usize,
}

#[derive(Parser)]
pub(crate) struct CompileArgs {
    /// Directory of a build prepared with `slugc prepare`
    #[arg(long, env = "SLUG_BUILD_DIR")]
    pub build_dir: PathBuf,
}

fn parse_config_var(value: &str) -> Result<(ConfigVarName, String), String> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {value:?}"))?;

    name.parse::<ConfigVarName>()
        .map(|name| (name, String::from(value)))
        .map_err(|error| error.to_string())
}
