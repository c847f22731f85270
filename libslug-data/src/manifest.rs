use crate::buildpack::ResolvedBuildpack;
use serde::{Deserialize, Serialize};

/// File name of the persisted manifest inside a build root.
pub const MANIFEST_FILE_NAME: &str = "manifest.toml";

/// The hand-off between the prepare and the compile phase.
///
/// The order of `buildpacks` is the execution order. Prepare keeps it identical to the
/// declaration order, no matter in which order the downloads finished.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompileManifest {
    pub application: String,
    pub stack: String,
    pub source_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<ResolvedBuildpack>,
}
