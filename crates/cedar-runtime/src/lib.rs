//! Host-facing capabilities used by cedar build steps.
//!
//! Everything that touches the host outside the work directory goes through
//! a trait defined here: `CommandRunner` for external programs,
//! `SnapInstaller` for package and snap staging, and `GadgetLayout` for
//! partition layout and volume writing. The mount manager builds on
//! `CommandRunner` to pair every acquired mount with its release. `archive`
//! and `fetch` unpack and download root filesystem tarballs. `mock`
//! provides recording implementations of each capability.

pub mod archive;
pub mod command;
pub mod fetch;
pub mod layout;
pub mod mock;
pub mod mount;
pub mod prereq;
pub mod snap;

pub use archive::{sha256_file, unpack_tarball, verify_sha256, Compression};
pub use command::{run_all, CommandOutput, CommandRunner, CommandSpec, HostRunner};
pub use fetch::{download, is_remote, ppa_fingerprint};
pub use layout::{GadgetLayout, VolumeWriteRequest, YamlGadgetLayout};
pub use mount::{run_teardown, settle_command, with_mounts, MountPlan, MountPoint};
pub use prereq::{check_build_prereqs, format_missing, is_root, BuildNeeds, MissingPrereq};
pub use snap::{parse_snap_spec, PrepareOptions, SnapInstaller, SnapdInstaller};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start \"{command}\": {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("command \"{command}\" failed ({status}). Output: \n{output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
    /// Release failures, joined after the error that triggered the release.
    #[error("{}", teardown_message(.original.as_deref(), .failures))]
    Teardown {
        original: Option<Box<RuntimeError>>,
        failures: Vec<String>,
    },
    #[error("invalid snap argument: {0}")]
    InvalidSnap(String),
    #[error("gadget layout error: {0}")]
    Gadget(String),
    #[error("rootfs archive error: {0}")]
    Archive(String),
    #[error("download failed: {0}")]
    Fetch(String),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn teardown_message(original: Option<&RuntimeError>, failures: &[String]) -> String {
    match original {
        Some(e) => {
            let mut lines = vec![e.to_string()];
            lines.extend(failures.iter().cloned());
            lines.join("\n")
        }
        None => format!("teardown failed: {}", failures.join("\n")),
    }
}
