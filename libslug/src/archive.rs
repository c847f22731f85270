//! Tarball creation and extraction for slugs and downloaded buildpacks.
//!
//! Packing is deterministic: entries are visited in sorted order and headers carry neither
//! timestamps nor ownership, so the same tree always yields the same bytes and checksum.
//!
//! Extraction fails closed. Every destination path is normalized and checked to stay inside the
//! destination directory, and so are symlink targets. Parent directories are additionally
//! canonicalized after creation, which prevents writing through a symlink extracted earlier.

use crate::digest::DigestingWriter;
use crate::fs::normalize_path;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header, HeaderMode};

/// The container format of an archive.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArchiveFormat {
    /// An uncompressed tar stream.
    Tar,
    /// A gzip compressed tar stream.
    TarGz,
}

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("Could not read {0} while packing: {1}")]
    Walk(PathBuf, #[source] io::Error),

    #[error("Could not write archive: {0}")]
    Write(#[source] io::Error),

    #[error("Could not read archive: {0}")]
    Read(#[source] io::Error),

    #[error("Could not extract archive entry to {0}: {1}")]
    Unpack(PathBuf, #[source] io::Error),

    #[error("Archive entry {0} would be written outside of the destination directory")]
    PathTraversal(PathBuf),

    #[error("Archive symlink entry {0} has no link target")]
    MissingLinkTarget(PathBuf),
}

/// Packs the contents of `source_dir` into `writer`.
///
/// Paths in the archive are relative to `source_dir`. Directories are stored as entries of their
/// own so their permissions survive extraction, regular files carry their permission bits.
/// Symlinks and other special files are skipped.
///
/// Returns the writer together with the SHA256 hex digest of exactly the bytes written to it.
pub fn pack<W: Write>(
    source_dir: &Path,
    format: ArchiveFormat,
    writer: W,
) -> Result<(W, String), ArchiveError> {
    let digesting_writer = DigestingWriter::new(writer);

    let digesting_writer = match format {
        ArchiveFormat::Tar => {
            let mut builder = tar::Builder::new(digesting_writer);
            append_directory_contents(&mut builder, source_dir, Path::new(""))?;
            builder.into_inner().map_err(ArchiveError::Write)?
        }
        ArchiveFormat::TarGz => {
            let mut builder =
                tar::Builder::new(GzEncoder::new(digesting_writer, Compression::default()));
            append_directory_contents(&mut builder, source_dir, Path::new(""))?;
            builder
                .into_inner()
                .and_then(GzEncoder::finish)
                .map_err(ArchiveError::Write)?
        }
    };

    Ok(digesting_writer.finalize())
}

/// Packs the contents of `source_dir` into a new file at `destination`, see [`pack`].
///
/// Returns the SHA256 hex digest of the written file.
pub fn pack_to_file(
    source_dir: &Path,
    format: ArchiveFormat,
    destination: &Path,
) -> Result<String, ArchiveError> {
    let file = fs::File::create(destination).map_err(ArchiveError::Write)?;
    let (mut writer, digest) = pack(source_dir, format, BufWriter::new(file))?;
    writer.flush().map_err(ArchiveError::Write)?;

    Ok(digest)
}

fn append_directory_contents<W: Write>(
    builder: &mut tar::Builder<W>,
    source_root: &Path,
    relative_dir: &Path,
) -> Result<(), ArchiveError> {
    let dir = source_root.join(relative_dir);

    let mut entries = fs::read_dir(&dir)
        .and_then(|read_dir| read_dir.collect::<Result<Vec<_>, _>>())
        .map_err(|error| ArchiveError::Walk(dir.clone(), error))?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let relative_path = relative_dir.join(entry.file_name());
        let metadata =
            fs::symlink_metadata(&path).map_err(|error| ArchiveError::Walk(path.clone(), error))?;

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
        // Deterministic mode coarsens permissions to 0o644/0o755, keep the actual bits instead.
        header.set_mode(metadata.permissions().mode() & 0o7777);

        if metadata.is_dir() {
            builder
                .append_data(&mut header, &relative_path, io::empty())
                .map_err(ArchiveError::Write)?;
            append_directory_contents(builder, source_root, &relative_path)?;
        } else if metadata.is_file() {
            let file =
                fs::File::open(&path).map_err(|error| ArchiveError::Walk(path.clone(), error))?;
            builder
                .append_data(&mut header, &relative_path, file)
                .map_err(ArchiveError::Write)?;
        } else {
            log::debug!("Not packing {}, it is not a regular file", path.display());
        }
    }

    Ok(())
}

/// Extracts an archive read from `reader` into `destination`.
///
/// With `strip_first_component` the leading path component of every entry is dropped, which
/// unwraps tarballs that nest their payload in a single synthetic top level directory.
///
/// Any entry that would end up outside of `destination` aborts the extraction with
/// [`ArchiveError::PathTraversal`]. Entries extracted before the offending one are left in place.
pub fn extract<R: Read>(
    reader: R,
    format: ArchiveFormat,
    destination: &Path,
    strip_first_component: bool,
) -> Result<(), ArchiveError> {
    match format {
        ArchiveFormat::Tar => extract_tar(reader, destination, strip_first_component),
        ArchiveFormat::TarGz => {
            extract_tar(GzDecoder::new(reader), destination, strip_first_component)
        }
    }
}

fn extract_tar<R: Read>(
    reader: R,
    destination: &Path,
    strip_first_component: bool,
) -> Result<(), ArchiveError> {
    fs::create_dir_all(destination)
        .map_err(|error| ArchiveError::Unpack(destination.to_path_buf(), error))?;
    let root = fs::canonicalize(destination)
        .map_err(|error| ArchiveError::Unpack(destination.to_path_buf(), error))?;

    let mut archive = tar::Archive::new(reader);
    // Applied once every entry is written so read-only directories can still be populated.
    let mut directory_modes = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Read)? {
        let mut entry = entry.map_err(ArchiveError::Read)?;
        let entry_path = entry.path().map_err(ArchiveError::Read)?.into_owned();

        let Some(relative_path) = entry_relative_path(&entry_path, strip_first_component) else {
            continue;
        };

        let target = normalize_path(&root.join(&relative_path));
        if target == root {
            continue;
        }
        ensure_inside(&root, &target, &entry_path)?;

        let unpack_error = |error: io::Error| ArchiveError::Unpack(target.clone(), error);
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(unpack_error)?;
                ensure_canonical_inside(&root, &target, &entry_path)?;
                let mode = entry.header().mode().map_err(ArchiveError::Read)?;
                directory_modes.push((target.clone(), mode));
            }
            EntryType::Regular | EntryType::Continuous => {
                prepare_parent(&root, &target, &entry_path)?;
                remove_existing_symlink(&target).map_err(unpack_error)?;

                let mode = entry.header().mode().map_err(ArchiveError::Read)?;
                let mut file = fs::File::create(&target).map_err(unpack_error)?;
                io::copy(&mut entry, &mut file).map_err(unpack_error)?;
                set_mode(&target, mode).map_err(unpack_error)?;
            }
            EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .map_err(ArchiveError::Read)?
                    .ok_or_else(|| ArchiveError::MissingLinkTarget(entry_path.clone()))?
                    .into_owned();

                let parent = prepare_parent(&root, &target, &entry_path)?;
                let resolved = resolve_link_target(&root, &parent, &link_name)
                    .ok_or_else(|| ArchiveError::PathTraversal(entry_path.clone()))?;
                ensure_inside(&root, &resolved, &entry_path)?;

                remove_existing_symlink(&target).map_err(unpack_error)?;
                std::os::unix::fs::symlink(&link_name, &target).map_err(unpack_error)?;
            }
            other => {
                log::debug!(
                    "Skipping archive entry {} of type {other:?}",
                    entry_path.display()
                );
            }
        }
    }

    for (path, mode) in directory_modes.into_iter().rev() {
        set_mode(&path, mode).map_err(|error| ArchiveError::Unpack(path, error))?;
    }

    Ok(())
}

/// Resolves a symlink target relative to the (canonical) directory containing the link, the way
/// the filesystem will once the link exists.
///
/// Links already extracted are followed. A `..` is only accepted directly after a real directory,
/// since after a symlink or a path that does not exist yet its meaning can change with later
/// entries. Returns `None` for absolute targets and for targets that leave `root`.
fn resolve_link_target(root: &Path, parent: &Path, link_name: &Path) -> Option<PathBuf> {
    let mut resolved = parent.to_path_buf();
    let mut after_real_directory = true;

    for component in link_name.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !after_real_directory || resolved == root {
                    return None;
                }
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                after_real_directory = match fs::symlink_metadata(&resolved) {
                    Ok(metadata) if metadata.file_type().is_symlink() => {
                        if let Ok(canonical) = fs::canonicalize(&resolved) {
                            resolved = canonical;
                        }
                        false
                    }
                    Ok(metadata) => metadata.is_dir(),
                    Err(_) => false,
                };
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }

        if !resolved.starts_with(root) {
            return None;
        }
    }

    Some(resolved)
}

fn entry_relative_path(entry_path: &Path, strip_first_component: bool) -> Option<PathBuf> {
    let mut components = entry_path
        .components()
        .filter(|component| !matches!(component, Component::CurDir));

    if strip_first_component {
        components.next();
    }

    let relative_path: PathBuf = components.collect();
    if relative_path.as_os_str().is_empty() {
        None
    } else {
        Some(relative_path)
    }
}

fn ensure_inside(root: &Path, path: &Path, entry_path: &Path) -> Result<(), ArchiveError> {
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(ArchiveError::PathTraversal(entry_path.to_path_buf()))
    }
}

fn ensure_canonical_inside(
    root: &Path,
    path: &Path,
    entry_path: &Path,
) -> Result<PathBuf, ArchiveError> {
    let canonical_path =
        fs::canonicalize(path).map_err(|error| ArchiveError::Unpack(path.to_path_buf(), error))?;
    ensure_inside(root, &canonical_path, entry_path)?;
    Ok(canonical_path)
}

/// Creates the parent directory of `target` and returns its canonical path.
fn prepare_parent(root: &Path, target: &Path, entry_path: &Path) -> Result<PathBuf, ArchiveError> {
    let parent = target
        .parent()
        .ok_or_else(|| ArchiveError::PathTraversal(entry_path.to_path_buf()))?;

    fs::create_dir_all(parent)
        .map_err(|error| ArchiveError::Unpack(parent.to_path_buf(), error))?;

    ensure_canonical_inside(root, parent, entry_path)
}

fn remove_existing_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}
