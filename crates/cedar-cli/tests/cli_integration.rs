//! CLI subprocess integration tests.
//!
//! These run the `cedar` binary and check exit codes and output. Every
//! build here is a dry run or fails during setup, so no host tool runs.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const VALID: &str = "\
name: cli
architecture: amd64
series: noble
class: preinstalled
rootfs:
  sources-list-deb822: false
customization:
  extra-snaps:
    - name: hello
artifacts:
  manifest:
    name: cli.manifest
";

const INVALID: &str = "\
name: cli
architecture: amd64
series: noble
class: preinstalled
artifacts:
  img:
    - name: pc.img
";

fn cedar_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cedar"));
    cmd.env("CEDAR_SKIP_PREREQS", "1");
    cmd.env_remove("CEDAR_LOG");
    cmd
}

fn write_definition(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("image.yaml");
    std::fs::write(&path, content).unwrap();
    path
}

fn build(args: &[&str], definition: &Path) -> Output {
    cedar_bin()
        .arg("build")
        .args(args)
        .arg(definition)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = cedar_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("cedar"));
}

#[test]
fn dry_run_prints_plan_and_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let work = dir.path().join("work");

    let output = build(
        &["--dry-run", "--workdir", work.to_str().unwrap()],
        &definition,
    );
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Following steps would be executed:"), "{out}");
    assert!(out.contains("[0] create_chroot"), "{out}");
    assert!(out.contains("[1] prepare_image"), "{out}");
    assert!(out.contains("[4] generate_package_manifest"), "{out}");
    assert!(!out.contains("Build successful"));
    assert!(!work.exists());
}

#[test]
fn dry_run_honours_thru() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(&["--dry-run", "--thru", "set_default_locale"], &definition);
    assert_eq!(output.status.code(), Some(0));
    let out = stdout(&output);
    assert!(out.contains("[2] set_default_locale"));
    assert!(!out.contains("clean_rootfs"));
}

#[test]
fn dry_run_with_image_path_plans_no_chroot_creation() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let tree = dir.path().join("tree");
    std::fs::create_dir(&tree).unwrap();

    let output = build(
        &["--dry-run", "--image-path", tree.to_str().unwrap()],
        &definition,
    );
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("[0] prepare_image"), "{out}");
    assert!(!out.contains("create_chroot"), "{out}");
}

#[test]
fn missing_image_path_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let absent = dir.path().join("absent");
    let output = build(
        &["--dry-run", "--image-path", absent.to_str().unwrap()],
        &definition,
    );
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("is not accessible"), "{}", stderr(&output));
}

#[test]
fn until_and_thru_together_exit_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(
        &["--until", "clean_rootfs", "--thru", "prepare_image"],
        &definition,
    );
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("error: cannot specify both --until and --thru"));
}

#[test]
fn resume_without_workdir_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(&["--resume"], &definition);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("must specify workdir when using --resume flag"));
}

#[test]
fn conflicting_verbosity_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(&["--quiet", "--debug", "--dry-run"], &definition);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("mutually exclusive"));
}

#[test]
fn unknown_step_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(&["--dry-run", "--until", "make_disk"], &definition);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("state make_disk is not a valid state name"));
}

#[test]
fn invalid_definition_exits_with_definition_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), INVALID);
    let output = build(&["--dry-run"], &definition);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Key img cannot be used without key gadget:"));
}

#[test]
fn missing_definition_exits_with_definition_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = build(&["--dry-run"], &dir.path().join("absent.yaml"));
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("failed to read definition file"));
}

#[test]
fn resume_without_checkpoint_exits_with_resume_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let work = tempfile::tempdir().unwrap();
    let output = build(
        &["--dry-run", "--resume", "--workdir", work.path().to_str().unwrap()],
        &definition,
    );
    assert_eq!(output.status.code(), Some(4));
    assert!(stderr(&output).contains("no checkpoint found"));
}

#[test]
fn bad_sector_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = build(&["--dry-run", "--sector-size", "1000"], &definition);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("sector size must be 512 or 4096"));
}

#[test]
fn validate_lists_planned_steps() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path(), VALID);
    let output = cedar_bin()
        .arg("validate")
        .arg(&definition)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let out = stdout(&output);
    assert!(out.contains("is valid"));
    assert!(out.contains("[3] clean_rootfs"));
    assert!(stderr(&output).contains("deprecated format"));

    let output = cedar_bin()
        .arg("validate")
        .arg("--existing-tree")
        .arg(&definition)
        .output()
        .unwrap();
    let out = stdout(&output);
    assert!(out.contains("[0] prepare_image"), "{out}");
    assert!(!out.contains("create_chroot"), "{out}");
}

#[test]
fn validate_reports_every_error() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(
        dir.path(),
        "\
name: cli
architecture: amd64
series: noble
class: preinstalled
gadget:
  type: git
customization:
  manual:
    mkdir:
      - path: relative/path
",
    );
    let output = cedar_bin()
        .arg("validate")
        .arg(&definition)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let err = stderr(&output);
    assert!(err.contains("a URL must be provided"), "{err}");
    assert!(err.contains("needs to be an absolute path (relative/path)"), "{err}");
}
