use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, io};

/// An error that occurred during reading or writing a manifest or result file.
#[derive(thiserror::Error, Debug)]
pub enum TomlFileError {
    #[error("I/O error while reading/writing {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("Could not parse {0}: {1}")]
    Deserialization(PathBuf, #[source] toml::de::Error),

    #[error("Could not serialize contents of {0}: {1}")]
    Serialization(PathBuf, #[source] toml::ser::Error),
}

/// Serializes the given value as TOML and writes it to the given file path.
pub fn write_toml_file(value: &impl Serialize, path: impl AsRef<Path>) -> Result<(), TomlFileError> {
    let path = path.as_ref();

    let contents = toml::to_string(value)
        .map_err(|error| TomlFileError::Serialization(path.to_path_buf(), error))?;

    fs::write(path, contents).map_err(|error| TomlFileError::Io(path.to_path_buf(), error))
}

/// Reads the file at the given path and parses it as `A`.
pub fn read_toml_file<A: DeserializeOwned>(path: impl AsRef<Path>) -> Result<A, TomlFileError> {
    let path = path.as_ref();

    let contents =
        fs::read_to_string(path).map_err(|error| TomlFileError::Io(path.to_path_buf(), error))?;

    toml::from_str(&contents)
        .map_err(|error| TomlFileError::Deserialization(path.to_path_buf(), error))
}
