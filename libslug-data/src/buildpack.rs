use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A buildpack as declared by the application, before it has been fetched.
///
/// `url` is either an official registry URN (`urn:buildpack:<name>`) or a GitHub repository URL
/// with an optional `#ref` fragment. It is kept verbatim; resolving it into a download location
/// happens in `libslug::source`.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildpackReference {
    pub name: String,
    pub url: String,
}

impl BuildpackReference {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A buildpack that has been downloaded and extracted into the build root.
///
/// `directory` is relative to the build root's `buildpacks/` directory and is derived from a
/// hash of `url`, which is retained so failures can name the declaration that caused them.
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResolvedBuildpack {
    pub url: String,
    pub directory: PathBuf,
}
