use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Normalizes a path without it needing to exist on the file system.
///
/// Works similarly to [`std::fs::canonicalize`] but without using the file system. This means that
/// symbolic links will not be resolved. In return, it can be used before creating a path on the
/// file system.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();

    let mut result = if let Some(component @ Component::Prefix(..)) = components.peek().copied() {
        components.next();
        PathBuf::from(component.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => {
                result.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(component) => {
                result.push(component);
            }
        }
    }

    result
}

/// Recursively copies the contents of `src_dir` into `dst_dir`.
///
/// `exclude` is consulted with the path of every entry relative to `src_dir`. Excluded entries
/// are never copied, and excluded directories are not descended into. Regular files keep their
/// permission bits, symlinks are recreated verbatim. Other kinds of entries (sockets, FIFOs) are
/// skipped.
///
/// `should_stop` is polled before every entry, the copy ends with an [`io::ErrorKind::Interrupted`]
/// error once it returns `true`.
///
/// # Atomicity:
/// No atomicity guarantees are made. A failed copy leaves the already copied entries in place.
pub fn copy_filtered(
    src_dir: &Path,
    dst_dir: &Path,
    exclude: &impl Fn(&Path) -> bool,
    should_stop: &impl Fn() -> bool,
) -> io::Result<()> {
    fs::create_dir_all(dst_dir)?;
    copy_filtered_recursive(src_dir, dst_dir, Path::new(""), exclude, should_stop)
}

fn copy_filtered_recursive(
    src_root: &Path,
    dst_root: &Path,
    relative_dir: &Path,
    exclude: &impl Fn(&Path) -> bool,
    should_stop: &impl Fn() -> bool,
) -> io::Result<()> {
    for dir_entry in fs::read_dir(src_root.join(relative_dir))? {
        if should_stop() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "copy was cancelled",
            ));
        }

        let dir_entry = dir_entry?;
        let relative_path = relative_dir.join(dir_entry.file_name());

        if exclude(&relative_path) {
            log::debug!("Skipping ignored path {}", relative_path.display());
            continue;
        }

        let src_path = dir_entry.path();
        let dst_path = dst_root.join(&relative_path);
        let file_type = dir_entry.file_type()?;

        if file_type.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_filtered_recursive(src_root, dst_root, &relative_path, exclude, should_stop)?;
            // Applied last, a read-only source directory must still be writable while filling it.
            fs::set_permissions(&dst_path, dir_entry.metadata()?.permissions())?;
        } else if file_type.is_file() {
            // `fs::copy` carries the permission bits over.
            fs::copy(&src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&src_path)?, &dst_path)?;
        } else {
            log::debug!("Skipping special file {}", relative_path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(&PathBuf::from("/foo/bar/baz")),
            PathBuf::from("/foo/bar/baz")
        );

        assert_eq!(
            normalize_path(&PathBuf::from("/foo/bar/../baz")),
            PathBuf::from("/foo/baz")
        );

        assert_eq!(
            normalize_path(&PathBuf::from("/tmp/dest/../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );

        assert_eq!(
            normalize_path(&PathBuf::from("foo/./bar/../../23/hello.txt")),
            PathBuf::from("23/hello.txt")
        );
    }

    #[test]
    fn test_copy_filtered() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();

        fs::create_dir_all(src_dir.path().join("bin")).unwrap();
        fs::create_dir_all(src_dir.path().join("tmp/cache")).unwrap();
        fs::write(src_dir.path().join("bin/server"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(
            src_dir.path().join("bin/server"),
            fs::Permissions::from_mode(0o751),
        )
        .unwrap();
        fs::write(src_dir.path().join("tmp/cache/blob"), "cached").unwrap();
        fs::write(src_dir.path().join("README"), "readme").unwrap();
        std::os::unix::fs::symlink("README", src_dir.path().join("README.md")).unwrap();

        copy_filtered(
            src_dir.path(),
            dst_dir.path(),
            &|path: &Path| path == Path::new("tmp"),
            &|| false,
        )
        .unwrap();

        let server_metadata = fs::metadata(dst_dir.path().join("bin/server")).unwrap();
        assert_eq!(server_metadata.permissions().mode() & 0o777, 0o751);
        assert_eq!(
            fs::read_to_string(dst_dir.path().join("README")).unwrap(),
            "readme"
        );
        assert_eq!(
            fs::read_link(dst_dir.path().join("README.md")).unwrap(),
            PathBuf::from("README")
        );
        assert!(!dst_dir.path().join("tmp").exists());
    }

    #[test]
    fn test_copy_filtered_stops() {
        let src_dir = tempdir().unwrap();
        let dst_dir = tempdir().unwrap();
        fs::write(src_dir.path().join("file"), "contents").unwrap();

        let error = copy_filtered(src_dir.path(), dst_dir.path(), &|_: &Path| false, &|| true)
            .unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::Interrupted);
        assert!(!dst_dir.path().join("file").exists());
    }
}
