use crate::newtypes::slug_newtype;
use fancy_regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::{fs, io};

/// File name of the Procfile inside the application directory.
pub const PROCFILE_NAME: &str = "Procfile";

slug_newtype!(
    /// The name of a process declared in a Procfile, i.e. `web` or `worker`.
    ProcessType,
    /// An error that occurred when parsing a `ProcessType` from a `String`.
    ProcessTypeError,
    r"^[[:alnum:]_-]+$"
);

static PROCFILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([[:alnum:]_-]+):\s*(.+)$").expect("Procfile line regex should be valid")
});

/// Process types declared by an application, mapping process names to their commands.
pub type ProcessTypes = BTreeMap<ProcessType, String>;

#[derive(thiserror::Error, Debug)]
pub enum ProcfileError {
    #[error("No Procfile found at {0}, the application must declare at least one process type")]
    Missing(PathBuf),

    #[error("Could not read Procfile at {0}: {1}")]
    Read(PathBuf, io::Error),

    #[error("Invalid Procfile line {line_number}: {line:?}")]
    InvalidLine { line_number: usize, line: String },
}

/// Parses the contents of a Procfile.
///
/// Every non-blank line must have the form `<process>: <command>`. Lines are otherwise taken
/// verbatim, there is no comment syntax. If a process name is declared more than once, the last
/// declaration wins.
pub fn parse_procfile(contents: &str) -> Result<ProcessTypes, ProcfileError> {
    let mut process_types = ProcessTypes::new();

    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let invalid_line = || ProcfileError::InvalidLine {
            line_number: index + 1,
            line: String::from(line),
        };

        let captures = PROCFILE_LINE
            .captures(line.trim_end())
            .ok()
            .flatten()
            .ok_or_else(invalid_line)?;

        let process_type = captures
            .get(1)
            .and_then(|name| name.as_str().parse::<ProcessType>().ok())
            .ok_or_else(invalid_line)?;

        let command = captures
            .get(2)
            .map(|command| String::from(command.as_str()))
            .ok_or_else(invalid_line)?;

        process_types.insert(process_type, command);
    }

    Ok(process_types)
}

/// Reads and parses the Procfile at the given path. A missing file is an error.
pub fn read_procfile(path: impl AsRef<Path>) -> Result<ProcessTypes, ProcfileError> {
    let path = path.as_ref();

    match fs::read_to_string(path) {
        Ok(contents) => parse_procfile(&contents),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(ProcfileError::Missing(path.to_path_buf()))
        }
        Err(error) => Err(ProcfileError::Read(path.to_path_buf(), error)),
    }
}
