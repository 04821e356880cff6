use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Which optional host features a planned build will use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildNeeds {
    pub git: bool,
    /// The chroot is created with debootstrap.
    pub bootstrap: bool,
    pub germinate: bool,
    /// Keys are imported or signatures checked.
    pub gpg: bool,
    pub preseed: bool,
    pub disk: bool,
    pub qcow2: bool,
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid() takes no arguments, has no side effects, and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Check the host tools a build with `needs` will call.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_build_prereqs(needs: BuildNeeds) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("snap") {
        missing.push(MissingPrereq {
            name: "snap",
            purpose: "staging snaps into the image",
            install_hint: "apt install snapd",
        });
    }

    if needs.git && !command_exists("git") {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "cloning the gadget tree",
            install_hint: "apt install git",
        });
    }

    for (needed, name, purpose, hint) in [
        (needs.bootstrap, "debootstrap", "creating the chroot", "apt install debootstrap"),
        (needs.germinate, "germinate", "expanding seeds into packages", "apt install germinate"),
        (needs.gpg, "gpg", "importing PPA keys and checking signatures", "apt install gpg"),
    ] {
        if needed && !command_exists(name) {
            missing.push(MissingPrereq {
                name,
                purpose,
                install_hint: hint,
            });
        }
    }
    if needs.bootstrap && !is_root() {
        missing.push(MissingPrereq {
            name: "root privileges",
            purpose: "creating the chroot",
            install_hint: "re-run with sudo",
        });
    }

    if needs.preseed {
        for (name, hint) in [
            ("mount", "part of util-linux (usually pre-installed)"),
            ("umount", "part of util-linux (usually pre-installed)"),
            ("udevadm", "apt install udev"),
        ] {
            if !command_exists(name) {
                missing.push(MissingPrereq {
                    name,
                    purpose: "mounting virtual filesystems for preseeding",
                    install_hint: hint,
                });
            }
        }
        if !is_root() && !needs.bootstrap {
            missing.push(MissingPrereq {
                name: "root privileges",
                purpose: "mounting inside the chroot",
                install_hint: "re-run with sudo",
            });
        }
    }

    if needs.disk {
        for (name, hint) in [
            ("parted", "apt install parted"),
            ("mkfs.ext4", "apt install e2fsprogs"),
            ("mkfs.vfat", "apt install dosfstools"),
        ] {
            if !command_exists(name) {
                missing.push(MissingPrereq {
                    name,
                    purpose: "writing disk images",
                    install_hint: hint,
                });
            }
        }
    }

    if needs.qcow2 && !command_exists("qemu-img") {
        missing.push(MissingPrereq {
            name: "qemu-img",
            purpose: "converting images to qcow2",
            install_hint: "apt install qemu-utils",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nSet CEDAR_SKIP_PREREQS=1 to skip this check.");
    msg
}
