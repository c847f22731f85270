//! Resolution of buildpack source URIs to downloadable tarballs.
//!
//! Two kinds of URIs are understood:
//!
//! - `urn:buildpack:<name>` for buildpacks published to the buildpack registry
//! - `https://github.com/<owner>/<repo>[.git][#<ref>]` for buildpacks hosted on GitHub
//!
//! Downloads are extracted into a directory named after the SHA256 of the URI. Downloading the
//! same URI twice into the same base directory replaces the earlier extraction, no locking is
//! done for concurrent downloads of the same URI.

use crate::archive::{self, ArchiveError, ArchiveFormat};
use crate::digest::sha256_hex;
use crate::http::{self, HttpError};
use libslug_data::buildpack::ResolvedBuildpack;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use tokio::task::JoinError;
use tokio_util::io::SyncIoBridge;
use uriparse::URIReference;

const DEFAULT_REGISTRY_BASE_URL: &str = "https://buildpack-registry.s3.amazonaws.com/buildpacks";
const DEFAULT_GITHUB_BASE_URL: &str = "https://github.com";
const DEFAULT_GITHUB_REFERENCE: &str = "HEAD";

/// Base URLs that source URIs are resolved against.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Endpoints {
    /// Registry tarballs are fetched from `<registry_base_url>/<name>.tgz`.
    pub registry_base_url: String,
    /// GitHub tarballs are fetched from `<github_base_url>/<owner>/<repo>/archive/<ref>.tar.gz`.
    pub github_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            registry_base_url: String::from(DEFAULT_REGISTRY_BASE_URL),
            github_base_url: String::from(DEFAULT_GITHUB_BASE_URL),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SourceKind {
    Registry {
        name: String,
    },
    GitHub {
        owner: String,
        repo: String,
        reference: String,
    },
}

/// A parsed buildpack source URI.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Source {
    uri: String,
    kind: SourceKind,
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("Unsupported buildpack source: {0}")]
    Unsupported(String),

    #[error("Could not download buildpack {uri}: {source}")]
    Download {
        uri: String,
        #[source]
        source: HttpError,
    },

    #[error("Could not extract buildpack {uri}: {source}")]
    Extract {
        uri: String,
        #[source]
        source: ArchiveError,
    },

    #[error("Could not prepare directory {0} for buildpack download: {1}")]
    Directory(PathBuf, #[source] io::Error),

    #[error("Extraction task for buildpack {uri} did not complete: {source}")]
    Task {
        uri: String,
        #[source]
        source: JoinError,
    },
}

impl SourceError {
    /// Whether the download was rejected because an archive entry would have escaped the
    /// destination directory.
    pub fn is_path_traversal(&self) -> bool {
        matches!(
            self,
            SourceError::Extract {
                source: ArchiveError::PathTraversal(_),
                ..
            }
        )
    }
}

impl Source {
    pub fn parse(uri: &str) -> Result<Self, SourceError> {
        let unsupported = || SourceError::Unsupported(String::from(uri));

        let uri_reference = URIReference::try_from(uri).map_err(|_| unsupported())?;
        let scheme = uri_reference
            .scheme()
            .map(uriparse::scheme::Scheme::as_str);

        let kind = match scheme {
            Some("urn") => {
                let path = uri_reference.path().to_string();
                let name = path
                    .strip_prefix("buildpack:")
                    .filter(|name| !name.is_empty())
                    .ok_or_else(unsupported)?;

                SourceKind::Registry {
                    name: String::from(name),
                }
            }
            Some("https") => {
                let is_github = uri_reference
                    .host()
                    .is_some_and(|host| host.to_string().eq_ignore_ascii_case("github.com"));

                if !is_github {
                    return Err(unsupported());
                }

                let segments = uri_reference
                    .path()
                    .segments()
                    .iter()
                    .map(uriparse::Segment::as_str)
                    .filter(|segment| !segment.is_empty())
                    .collect::<Vec<_>>();

                let [owner, repo] = segments.as_slice() else {
                    return Err(unsupported());
                };

                let repo = repo.strip_suffix(".git").unwrap_or(repo);
                if repo.is_empty() {
                    return Err(unsupported());
                }

                let reference = uri_reference
                    .fragment()
                    .map(uriparse::Fragment::as_str)
                    .filter(|fragment| !fragment.is_empty())
                    .unwrap_or(DEFAULT_GITHUB_REFERENCE);

                SourceKind::GitHub {
                    owner: String::from(*owner),
                    repo: String::from(repo),
                    reference: String::from(reference),
                }
            }
            _ => return Err(unsupported()),
        };

        Ok(Self {
            uri: String::from(uri),
            kind,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// The URL of the gzipped tarball holding the buildpack.
    pub fn tarball_url(&self, endpoints: &Endpoints) -> String {
        match &self.kind {
            SourceKind::Registry { name } => format!(
                "{}/{name}.tgz",
                endpoints.registry_base_url.trim_end_matches('/')
            ),
            SourceKind::GitHub {
                owner,
                repo,
                reference,
            } => format!(
                "{}/{owner}/{repo}/archive/{reference}.tar.gz",
                endpoints.github_base_url.trim_end_matches('/')
            ),
        }
    }

    /// The directory, relative to a download base directory, this source is extracted into.
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(sha256_hex(&self.uri))
    }

    /// GitHub tarballs wrap the repository in a `<repo>-<ref>/` directory that has to be removed.
    fn strip_first_component(&self) -> bool {
        matches!(self.kind, SourceKind::GitHub { .. })
    }

    /// Downloads the buildpack tarball and extracts it below `base_dir`.
    ///
    /// The response body is extracted while it is being received. An existing extraction of the
    /// same source is removed first.
    pub async fn download(
        &self,
        endpoints: &Endpoints,
        base_dir: &Path,
    ) -> Result<ResolvedBuildpack, SourceError> {
        let url = self.tarball_url(endpoints);
        let directory = self.directory();
        let destination = base_dir.join(&directory);

        log::info!("Downloading buildpack {} from {url}", self.uri);

        let response = http::get(url)
            .call()
            .await
            .map_err(|source| SourceError::Download {
                uri: self.uri.clone(),
                source,
            })?;

        match tokio::fs::remove_dir_all(&destination).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                return Err(SourceError::Directory(destination, error));
            }
            _ => {}
        }

        let reader = SyncIoBridge::new(http::body_reader(response));
        let strip_first_component = self.strip_first_component();
        let extract_destination = destination.clone();

        tokio::task::spawn_blocking(move || {
            archive::extract(
                reader,
                ArchiveFormat::TarGz,
                &extract_destination,
                strip_first_component,
            )
        })
        .await
        .map_err(|source| SourceError::Task {
            uri: self.uri.clone(),
            source,
        })?
        .map_err(|source| SourceError::Extract {
            uri: self.uri.clone(),
            source,
        })?;

        log::debug!("Extracted buildpack {} to {}", self.uri, destination.display());

        Ok(ResolvedBuildpack {
            url: self.uri.clone(),
            directory,
        })
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tarball(entries: &[(&str, &str, u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        for (entry_path, contents, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(*mode);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, entry_path, contents.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap()
    }

    fn evil_tarball() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let contents = b"root:x:0:0";

        let mut header = tar::Header::new_gnu();
        header.as_old_mut().name[..16].copy_from_slice(b"../../etc/passwd");
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &contents[..]).unwrap();

        builder.into_inner().unwrap().finish().unwrap()
    }

    async fn serve(server: &MockServer, url_path: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    fn endpoints(server: &MockServer) -> Endpoints {
        Endpoints {
            registry_base_url: format!("{}/buildpacks", server.uri()),
            github_base_url: server.uri(),
        }
    }

    #[test]
    fn parse_registry_urn() {
        let source = Source::parse("urn:buildpack:heroku/ruby").unwrap();

        assert_eq!(
            source.kind(),
            &SourceKind::Registry {
                name: String::from("heroku/ruby")
            }
        );
        assert_eq!(
            source.tarball_url(&Endpoints::default()),
            "https://buildpack-registry.s3.amazonaws.com/buildpacks/heroku/ruby.tgz"
        );
    }

    #[test]
    fn parse_github_url() {
        let source = Source::parse("https://github.com/heroku/heroku-buildpack-ruby").unwrap();

        assert_eq!(
            source.kind(),
            &SourceKind::GitHub {
                owner: String::from("heroku"),
                repo: String::from("heroku-buildpack-ruby"),
                reference: String::from("HEAD"),
            }
        );
        assert_eq!(
            source.tarball_url(&Endpoints::default()),
            "https://github.com/heroku/heroku-buildpack-ruby/archive/HEAD.tar.gz"
        );
    }

    #[test]
    fn parse_github_url_with_git_suffix_and_reference() {
        let source = Source::parse("https://github.com/heroku/heroku-buildpack-ruby.git#v250")
            .unwrap();

        assert_eq!(
            source.tarball_url(&Endpoints::default()),
            "https://github.com/heroku/heroku-buildpack-ruby/archive/v250.tar.gz"
        );
    }

    #[test]
    fn parse_unsupported_sources() {
        for uri in [
            "",
            "heroku/ruby",
            "urn:buildpack:",
            "urn:other:heroku/ruby",
            "http://github.com/heroku/heroku-buildpack-ruby",
            "https://gitlab.com/heroku/heroku-buildpack-ruby",
            "https://github.com/heroku",
            "https://github.com/heroku/heroku-buildpack-ruby/tree/main",
            "file:///tmp/buildpack",
        ] {
            assert!(
                matches!(Source::parse(uri), Err(SourceError::Unsupported(_))),
                "{uri:?} should be unsupported"
            );
        }
    }

    #[test]
    fn directory_is_content_addressed() {
        let first = Source::parse("urn:buildpack:heroku/ruby").unwrap();
        let second = Source::parse("urn:buildpack:heroku/ruby").unwrap();
        let other = Source::parse("urn:buildpack:heroku/nodejs").unwrap();

        assert_eq!(first.directory(), second.directory());
        assert_ne!(first.directory(), other.directory());
        assert_eq!(
            first.directory(),
            PathBuf::from(sha256_hex("urn:buildpack:heroku/ruby"))
        );
    }

    #[tokio::test]
    async fn download_registry_buildpack() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/buildpacks/heroku/ruby.tgz",
            tarball(&[("bin/detect", "#!/bin/sh\necho Ruby\n", 0o755)]),
        )
        .await;

        let base_dir = tempdir().unwrap();
        let source = Source::parse("urn:buildpack:heroku/ruby").unwrap();

        let resolved = source
            .download(&endpoints(&server), base_dir.path())
            .await
            .unwrap();

        assert_eq!(resolved.url, "urn:buildpack:heroku/ruby");
        assert_eq!(resolved.directory, source.directory());

        let detect = base_dir.path().join(&resolved.directory).join("bin/detect");
        assert_eq!(fs::read_to_string(&detect).unwrap(), "#!/bin/sh\necho Ruby\n");
        assert_eq!(
            fs::metadata(&detect).unwrap().permissions().mode() & 0o777,
            0o755
        );
    }

    #[tokio::test]
    async fn download_github_buildpack_strips_top_directory() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/heroku/heroku-buildpack-ruby/archive/main.tar.gz",
            tarball(&[("heroku-buildpack-ruby-main/bin/compile", "#!/bin/sh\n", 0o755)]),
        )
        .await;

        let base_dir = tempdir().unwrap();
        let source = Source::parse("https://github.com/heroku/heroku-buildpack-ruby#main").unwrap();

        let resolved = source
            .download(&endpoints(&server), base_dir.path())
            .await
            .unwrap();

        assert!(base_dir
            .path()
            .join(&resolved.directory)
            .join("bin/compile")
            .is_file());
    }

    #[tokio::test]
    async fn download_replaces_previous_extraction() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/buildpacks/heroku/ruby.tgz",
            tarball(&[("bin/compile", "#!/bin/sh\n", 0o755)]),
        )
        .await;

        let base_dir = tempdir().unwrap();
        let source = Source::parse("urn:buildpack:heroku/ruby").unwrap();
        let stale_file = base_dir.path().join(source.directory()).join("stale");
        fs::create_dir_all(stale_file.parent().unwrap()).unwrap();
        fs::write(&stale_file, "stale").unwrap();

        source
            .download(&endpoints(&server), base_dir.path())
            .await
            .unwrap();

        assert!(!stale_file.exists());
    }

    #[tokio::test]
    async fn download_rejects_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base_dir = tempdir().unwrap();
        let source = Source::parse("urn:buildpack:heroku/missing").unwrap();

        let error = source
            .download(&endpoints(&server), base_dir.path())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SourceError::Download {
                source: HttpError::UnexpectedStatus { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn download_rejects_path_traversal() {
        let server = MockServer::start().await;
        serve(&server, "/buildpacks/evil.tgz", evil_tarball()).await;

        let base_dir = tempdir().unwrap();
        let base_dir_path = base_dir.path().join("a/b");
        let source = Source::parse("urn:buildpack:evil").unwrap();

        let error = source
            .download(&endpoints(&server), &base_dir_path)
            .await
            .unwrap_err();

        assert!(error.is_path_traversal(), "{error}");
        assert!(!base_dir.path().join("a/etc/passwd").exists());
    }

    #[tokio::test]
    async fn download_rejects_malformed_gzip() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/buildpacks/broken.tgz",
            b"definitely not gzip".to_vec(),
        )
        .await;

        let base_dir = tempdir().unwrap();
        let source = Source::parse("urn:buildpack:broken").unwrap();

        let error = source
            .download(&endpoints(&server), base_dir.path())
            .await
            .unwrap_err();

        assert!(matches!(error, SourceError::Extract { .. }));
        assert!(!error.is_path_traversal());
    }
}
