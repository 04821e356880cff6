use crate::command::{CommandRunner, CommandSpec};
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A virtual or bind mount under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub src: String,
    pub base_path: PathBuf,
    /// Path under `base_path`, written with a leading `/`.
    pub rel_path: String,
    pub fstype: String,
    pub opts: Vec<String>,
}

impl MountPoint {
    pub fn new(
        src: impl Into<String>,
        base_path: &Path,
        rel_path: impl Into<String>,
        fstype: impl Into<String>,
    ) -> Self {
        Self {
            src: src.into(),
            base_path: base_path.to_path_buf(),
            rel_path: rel_path.into(),
            fstype: fstype.into(),
            opts: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_opts(mut self, opts: &[&str]) -> Self {
        self.opts = opts.iter().map(|o| (*o).to_owned()).collect();
        self
    }

    pub fn target(&self) -> PathBuf {
        self.base_path.join(self.rel_path.trim_start_matches('/'))
    }

    pub fn mount_command(&self) -> CommandSpec {
        let mut cmd = CommandSpec::new("mount").args(["-t", self.fstype.as_str()]);
        if !self.opts.is_empty() {
            cmd = cmd.arg("-o").arg(self.opts.join(","));
        }
        cmd.arg(self.src.as_str()).path_arg(&self.target())
    }

    pub fn umount_command(&self) -> CommandSpec {
        CommandSpec::new("umount").path_arg(&self.target())
    }
}

/// Lets the kernel finish pending device events before anything is unmounted.
pub fn settle_command() -> CommandSpec {
    CommandSpec::new("udevadm").arg("settle")
}

/// Paired acquire and release command lists for a set of mounts.
///
/// `acquire` follows declaration order. `release` is the exact reverse,
/// preceded by one settle command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub acquire: Vec<CommandSpec>,
    pub release: Vec<CommandSpec>,
}

impl MountPlan {
    pub fn new(points: &[MountPoint]) -> Self {
        let acquire = points.iter().map(MountPoint::mount_command).collect();
        Self {
            acquire,
            release: release_for(points),
        }
    }
}

fn release_for(acquired: &[MountPoint]) -> Vec<CommandSpec> {
    let mut release = Vec::with_capacity(acquired.len() + 1);
    release.push(settle_command());
    release.extend(acquired.iter().rev().map(MountPoint::umount_command));
    release
}

/// Run every release command, collecting failures instead of stopping.
///
/// Returns `prev` unchanged when all commands succeed. Otherwise the result
/// carries both `prev` (if any) and every failure.
pub fn run_teardown(
    runner: &dyn CommandRunner,
    cmds: &[CommandSpec],
    prev: Option<RuntimeError>,
) -> Result<(), RuntimeError> {
    match join_errors(prev, release_failures(runner, cmds)) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn release_failures(runner: &dyn CommandRunner, cmds: &[CommandSpec]) -> Vec<String> {
    let mut failures = Vec::new();
    for cmd in cmds {
        if let Err(e) = runner.run(cmd) {
            warn!("teardown command \"{cmd}\" failed: {e}");
            let output = match e {
                RuntimeError::CommandFailed { output, .. } => output,
                other => other.to_string(),
            };
            failures.push(format!(
                "teardown command \"{cmd}\" failed. Output: \n{output}"
            ));
        }
    }
    failures
}

fn join_errors(prev: Option<RuntimeError>, failures: Vec<String>) -> Option<RuntimeError> {
    if failures.is_empty() {
        return prev;
    }
    Some(RuntimeError::Teardown {
        original: prev.map(Box::new),
        failures,
    })
}

/// Acquire `points` in order, run `op`, then release whatever was acquired.
///
/// Release runs on every exit path: after success, after `op` fails, and
/// after an acquisition fails partway. Only mounts that were actually
/// acquired are released, in reverse order.
pub fn with_mounts<T>(
    runner: &dyn CommandRunner,
    points: &[MountPoint],
    op: impl FnOnce(&dyn CommandRunner) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let mut acquired = 0;
    let mut failure = None;

    for point in points {
        match runner.run(&point.mount_command()) {
            Ok(_) => acquired += 1,
            Err(e) => {
                debug!("mount of {} failed, releasing {acquired} mounts", point.rel_path);
                failure = Some(e);
                break;
            }
        }
    }

    let result = match failure {
        Some(e) => Err(e),
        None => op(runner),
    };

    let failures = release_failures(runner, &release_for(&points[..acquired]));
    match (result, failures.is_empty()) {
        (Ok(value), true) => Ok(value),
        (Err(e), true) => Err(e),
        (result, false) => Err(RuntimeError::Teardown {
            original: result.err().map(Box::new),
            failures,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingRunner;

    fn points() -> Vec<MountPoint> {
        let base = Path::new("/chroot");
        vec![
            MountPoint::new("m1-src", base, "/m1", "tmpfs"),
            MountPoint::new("m2-src", base, "/m2", "devpts").with_opts(&["nodev", "nosuid"]),
            MountPoint::new("m3-src", base, "/m3", "proc"),
        ]
    }

    #[test]
    fn mount_point_commands() {
        let p = &points()[1];
        assert_eq!(
            p.mount_command().to_string(),
            "mount -t devpts -o nodev,nosuid m2-src /chroot/m2"
        );
        assert_eq!(p.umount_command().to_string(), "umount /chroot/m2");
    }

    #[test]
    fn plan_releases_in_reverse_after_settle() {
        let plan = MountPlan::new(&points());
        let acquire: Vec<String> = plan.acquire.iter().map(ToString::to_string).collect();
        let release: Vec<String> = plan.release.iter().map(ToString::to_string).collect();
        assert_eq!(acquire.len(), 3);
        assert!(acquire[0].ends_with("/chroot/m1"));
        assert_eq!(
            release,
            vec![
                "udevadm settle",
                "umount /chroot/m3",
                "umount /chroot/m2",
                "umount /chroot/m1",
            ]
        );
    }

    #[test]
    fn success_releases_everything() {
        let runner = RecordingRunner::new();
        let value = with_mounts(&runner, &points(), |r| {
            r.run(&CommandSpec::new("work"))?;
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        let calls = runner.calls();
        assert_eq!(calls[3], "work");
        assert_eq!(calls[4], "udevadm settle");
        assert_eq!(calls[5..], ["umount /chroot/m3", "umount /chroot/m2", "umount /chroot/m1"]);
    }

    #[test]
    fn failed_acquisition_releases_acquired_in_reverse_and_keeps_all_errors() {
        let runner = RecordingRunner::failing(&["m3-src", "umount /chroot/m1"]);
        let mut ran = false;
        let err = with_mounts(&runner, &points(), |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

        assert!(!ran);
        assert_eq!(
            runner.calls(),
            vec![
                "mount -t tmpfs m1-src /chroot/m1",
                "mount -t devpts -o nodev,nosuid m2-src /chroot/m2",
                "mount -t proc m3-src /chroot/m3",
                "udevadm settle",
                "umount /chroot/m2",
                "umount /chroot/m1",
            ]
        );

        let msg = err.to_string();
        assert!(msg.contains("mount -t proc m3-src /chroot/m3"), "{msg}");
        assert!(msg.contains("teardown command \"umount /chroot/m1\" failed"), "{msg}");
        match err {
            RuntimeError::Teardown { original, failures } => {
                assert!(original.is_some());
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn op_failure_is_returned_unchanged_when_release_succeeds() {
        let runner = RecordingRunner::new();
        let err = with_mounts(&runner, &points(), |_| -> Result<(), RuntimeError> {
            Err(RuntimeError::Gadget("boom".into()))
        })
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Gadget(_)));
        assert_eq!(runner.calls().last().unwrap(), "umount /chroot/m1");
    }

    #[test]
    fn release_failures_do_not_stop_remaining_releases() {
        let runner = RecordingRunner::failing(&["udevadm", "umount /chroot/m2"]);
        let err = with_mounts(&runner, &points(), |_| Ok(())).unwrap_err();
        assert_eq!(runner.calls().len(), 7);
        assert!(err.to_string().starts_with("teardown failed: "), "{err}");
        match err {
            RuntimeError::Teardown { original, failures } => {
                assert!(original.is_none());
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_teardown_keeps_the_triggering_error() {
        let runner = RecordingRunner::failing(&["umount /chroot/m1"]);
        let plan = MountPlan::new(&points());
        let prev = RuntimeError::Gadget("preseed broke".to_owned());
        let err = run_teardown(&runner, &plan.release, Some(prev)).unwrap_err();
        assert_eq!(runner.calls().len(), plan.release.len());
        let message = err.to_string();
        assert!(message.starts_with("gadget layout error: preseed broke\n"), "{message}");
        assert!(message.contains("umount /chroot/m1"), "{message}");
    }
}
