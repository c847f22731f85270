// Enable Clippy lints that are disabled by default.
// https://rust-lang.github.io/rust-clippy/stable/index.html
#![warn(clippy::pedantic)]

use indoc::indoc;
use libslug::write::Sink;
use libslug::{compile, BuildRoot, CompileError};
use libslug_data::buildpack::ResolvedBuildpack;
use libslug_data::manifest::CompileManifest;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const EXPORT_FOO: &str = indoc! {r#"
    #!/bin/sh
    echo 'export FOO=bar' > "$(dirname "$0")/../export"
"#};

const REQUIRE_FOO: &str = indoc! {r#"
    #!/bin/sh
    if [ "$FOO" != "bar" ]; then
      echo "FOO is not set" >&2
      exit 1
    fi
    echo "web: bin/server --foo $FOO" > "$1/Procfile"
"#};

fn write_executable(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn write_buildpack(build_root: &BuildRoot, directory: &str, detect: &str, compile: &str) {
    let dir = build_root.buildpacks_dir().join(directory);
    write_executable(&dir.join("bin/detect"), detect);
    write_executable(&dir.join("bin/compile"), compile);
}

fn manifest(directories: &[&str]) -> CompileManifest {
    CompileManifest {
        application: String::from("compiler-test"),
        stack: String::from("heroku-24"),
        source_version: String::from("8c1f3e2"),
        buildpacks: directories
            .iter()
            .map(|directory| ResolvedBuildpack {
                url: format!("urn:buildpack:{directory}"),
                directory: PathBuf::from(directory),
            })
            .collect(),
    }
}

/// Three buildpacks: `first` is a no-op, `exporter` leaves an `export` file setting `FOO` behind
/// and `consumer` fails unless `FOO` is set.
fn export_chain() -> (TempDir, BuildRoot) {
    let temp_dir = tempdir().unwrap();
    let build_root = BuildRoot::create(temp_dir.path().join("build")).unwrap();

    write_buildpack(&build_root, "first", "#!/bin/sh\necho First\n", "#!/bin/sh\n");
    write_buildpack(&build_root, "exporter", "#!/bin/sh\necho Exporter\n", EXPORT_FOO);
    write_buildpack(&build_root, "consumer", "#!/bin/sh\necho Consumer\n", REQUIRE_FOO);

    (temp_dir, build_root)
}

#[test]
fn later_buildpacks_see_exports_of_earlier_ones() {
    let (_temp_dir, build_root) = export_chain();

    let result = compile(
        &build_root,
        &manifest(&["first", "exporter", "consumer"]),
        Sink::null(),
        Sink::null(),
    )
    .unwrap();

    assert_eq!(result.detected_buildpack, "Consumer");
    assert_eq!(
        result
            .process_types
            .get("web")
            .map(String::as_str),
        Some("bin/server --foo bar")
    );
}

#[test]
fn exports_are_not_visible_to_earlier_buildpacks() {
    let (_temp_dir, build_root) = export_chain();

    let error = compile(
        &build_root,
        &manifest(&["first", "consumer", "exporter"]),
        Sink::null(),
        Sink::null(),
    )
    .unwrap_err();

    match error {
        CompileError::Buildpack(error) => {
            assert!(error.to_string().contains("urn:buildpack:consumer"));
        }
        other => panic!("Expected the consumer buildpack to fail, got {other}"),
    }
}

#[test]
fn declining_buildpack_stops_the_build() {
    let temp_dir = tempdir().unwrap();
    let build_root = BuildRoot::create(temp_dir.path().join("build")).unwrap();
    let marker = |name: &str| format!("#!/bin/sh\ntouch \"$1/{name}\"\n");

    write_buildpack(&build_root, "a", &marker("a-detected"), &marker("a-compiled"));
    write_buildpack(
        &build_root,
        "b",
        "#!/bin/sh\ntouch \"$1/b-detected\"\nexit 1\n",
        &marker("b-compiled"),
    );
    write_buildpack(&build_root, "c", &marker("c-detected"), &marker("c-compiled"));

    let (stdout, captured) = Sink::capture();
    let error = compile(&build_root, &manifest(&["a", "b", "c"]), stdout, Sink::null())
        .unwrap_err();

    match error {
        CompileError::BuildpackDeclined { url } => assert_eq!(url, "urn:buildpack:b"),
        other => panic!("Expected buildpack b to decline, got {other}"),
    }

    let app_dir = build_root.app_dir();
    assert!(app_dir.join("a-detected").exists());
    assert!(app_dir.join("a-compiled").exists());
    assert!(app_dir.join("b-detected").exists());
    assert!(!app_dir.join("b-compiled").exists());
    assert!(!app_dir.join("c-detected").exists());
    assert!(!app_dir.join("c-compiled").exists());
    assert!(!build_root.slug_path().exists());

    // `a` prints nothing on detect, its URL stands in for the name.
    assert!(captured
        .contents()
        .contains("-----> urn:buildpack:a app detected\n"));
}
