use glob::{MatchOptions, Pattern, PatternError};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the ignore file at the root of an application's source directory.
pub const SLUGIGNORE_FILE_NAME: &str = ".slugignore";

/// The set of paths excluded from the slug by a `.slugignore` file.
///
/// Patterns are expanded against the source directory once, when the file is parsed. Lookups are
/// plain set membership checks of a path and its ancestors, which means files created after
/// parsing are never matched.
#[derive(Debug, Clone, Default)]
pub struct SlugIgnore {
    ignored: HashSet<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum SlugIgnoreError {
    #[error("Could not read {0}: {1}")]
    Read(PathBuf, #[source] io::Error),

    #[error("Invalid pattern {pattern:?} on line {line_number} of {path}: {source}")]
    InvalidPattern {
        path: PathBuf,
        line_number: usize,
        pattern: String,
        #[source]
        source: PatternError,
    },

    #[error("Could not expand pattern {pattern:?}: {source}")]
    Expand {
        pattern: String,
        #[source]
        source: glob::GlobError,
    },
}

impl SlugIgnore {
    /// Parses the ignore file at the given path. Patterns are resolved relative to the directory
    /// containing the file.
    ///
    /// A missing file results in an empty set that ignores nothing.
    pub fn parse(ignore_file: impl AsRef<Path>) -> Result<Self, SlugIgnoreError> {
        let ignore_file = ignore_file.as_ref();
        let root = ignore_file.parent().unwrap_or_else(|| Path::new("."));

        let contents = match std::fs::read_to_string(ignore_file) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => return Err(SlugIgnoreError::Read(ignore_file.to_path_buf(), error)),
        };

        let mut ignored = HashSet::new();

        for (index, line) in contents.lines().enumerate() {
            let Some(patterns) = line_patterns(line) else {
                continue;
            };

            for pattern in patterns {
                Pattern::new(&pattern).map_err(|source| SlugIgnoreError::InvalidPattern {
                    path: ignore_file.to_path_buf(),
                    line_number: index + 1,
                    pattern: pattern.clone(),
                    source,
                })?;

                expand_pattern(root, &pattern, &mut ignored)?;
            }
        }

        log::debug!(
            "{} matched {} path(s) in {}",
            SLUGIGNORE_FILE_NAME,
            ignored.len(),
            root.display()
        );

        Ok(Self { ignored })
    }

    /// Parses `<source_dir>/.slugignore`.
    pub fn for_source_dir(source_dir: impl AsRef<Path>) -> Result<Self, SlugIgnoreError> {
        Self::parse(source_dir.as_ref().join(SLUGIGNORE_FILE_NAME))
    }

    /// Checks if a path relative to the source directory is ignored, either directly or because
    /// one of its parent directories is.
    pub fn is_ignored(&self, relative_path: impl AsRef<Path>) -> bool {
        let mut current = Some(relative_path.as_ref());

        while let Some(path) = current {
            if path.as_os_str().is_empty() {
                break;
            }

            if self.ignored.contains(path) {
                return true;
            }

            current = path.parent();
        }

        false
    }

    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }
}

/// Translates one line of an ignore file into the glob patterns it stands for, relative to the
/// source directory. Returns `None` for blank lines and comments.
fn line_patterns(line: &str) -> Option<Vec<String>> {
    let line = line.trim();

    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let line = line.trim_end_matches('/');

    if let Some(anchored) = line.strip_prefix('/') {
        let anchored = anchored.trim_start_matches('/');
        if anchored.is_empty() {
            return None;
        }
        Some(vec![String::from(anchored)])
    } else {
        let unanchored = line.strip_prefix("./").unwrap_or(line);
        if unanchored.is_empty() {
            return None;
        }
        Some(vec![
            String::from(unanchored),
            format!("**/{unanchored}"),
        ])
    }
}

fn expand_pattern(
    root: &Path,
    pattern: &str,
    ignored: &mut HashSet<PathBuf>,
) -> Result<(), SlugIgnoreError> {
    let full_pattern = format!(
        "{}/{pattern}",
        Pattern::escape(&root.to_string_lossy()).trim_end_matches('/')
    );

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let paths = glob::glob_with(&full_pattern, options).map_err(|source| {
        SlugIgnoreError::InvalidPattern {
            path: root.join(SLUGIGNORE_FILE_NAME),
            line_number: 0,
            pattern: String::from(pattern),
            source,
        }
    })?;

    for path in paths {
        let path = path.map_err(|source| SlugIgnoreError::Expand {
            pattern: String::from(pattern),
            source,
        })?;

        if let Ok(relative_path) = path.strip_prefix(root) {
            ignored.insert(relative_path.to_path_buf());
        }
    }

    Ok(())
}
