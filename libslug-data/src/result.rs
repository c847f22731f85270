use crate::procfile::ProcessTypes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File name of the persisted compile result inside a build root.
pub const RESULT_FILE_NAME: &str = "result.toml";

/// The outcome of a successful compile run.
///
/// `slug_checksum` has the form `sha256:<hex>` and covers exactly the bytes of the file at
/// `slug_path`.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompileResult {
    pub slug_path: PathBuf,
    pub slug_checksum: String,
    pub source_version: String,
    pub detected_buildpack: String,
    pub stack: String,
    #[serde(default)]
    pub process_types: ProcessTypes,
}
