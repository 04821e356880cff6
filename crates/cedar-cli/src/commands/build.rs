use super::{Failure, EXIT_FAILURE, EXIT_SUCCESS};
use cedar_core::{
    run_and_teardown, ClassicBuild, CommonOptions, CoreError, Engine, MachineOptions, Services,
    Validation,
};
use cedar_runtime::{check_build_prereqs, format_missing, MissingPrereq};
use std::path::PathBuf;
use tracing::warn;

pub struct BuildArgs {
    pub definition: PathBuf,
    pub image_path: Option<PathBuf>,
    pub until: Option<String>,
    pub thru: Option<String>,
    pub resume: bool,
    pub work_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub debug: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub dry_run: bool,
    pub channel: Option<String>,
    pub validation: Option<Validation>,
    pub preseed: bool,
    pub sector_size: u64,
}

fn skip_prereqs() -> bool {
    std::env::var("CEDAR_SKIP_PREREQS").as_deref() == Ok("1")
}

pub fn run(args: BuildArgs) -> Result<u8, Failure> {
    let common = CommonOptions {
        debug: args.debug,
        verbose: args.verbose,
        quiet: args.quiet,
        dry_run: args.dry_run,
        channel: args.channel,
        validation: args.validation,
        output_dir: args.output_dir,
        sector_size: args.sector_size,
    };
    let opts = MachineOptions {
        until: args.until,
        thru: args.thru,
        resume: args.resume,
        work_dir: args.work_dir,
    };
    let mut build = ClassicBuild::new(common, opts, args.definition, Services::host())
        .with_preseed(args.preseed)
        .with_image_path(args.image_path);

    build.setup()?;

    if !args.dry_run && !skip_prereqs() {
        let missing = build
            .build_needs()
            .map(check_build_prereqs)
            .unwrap_or_default();
        if !missing.is_empty() {
            return Err(prereq_failure(&missing, build.teardown()));
        }
    }

    run_and_teardown(&mut build)?;
    Ok(EXIT_SUCCESS)
}

/// Failure for a host missing tools, with any teardown error appended.
fn prereq_failure(missing: &[MissingPrereq], teardown: Result<(), CoreError>) -> Failure {
    let mut message = format_missing(missing);
    if let Err(e) = teardown {
        warn!("teardown after failed prerequisite check: {e}");
        message.push('\n');
        message.push_str(&e.to_string());
    }
    Failure::new(EXIT_FAILURE, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_git() -> Vec<MissingPrereq> {
        vec![MissingPrereq {
            name: "git",
            purpose: "cloning the gadget tree",
            install_hint: "apt install git",
        }]
    }

    #[test]
    fn prereq_failure_without_teardown_error() {
        let failure = prereq_failure(&missing_git(), Ok(()));
        assert_eq!(failure.code, EXIT_FAILURE);
        assert!(failure.message.starts_with("missing prerequisites:"));
        assert!(failure.message.ends_with("CEDAR_SKIP_PREREQS=1 to skip this check."));
    }

    #[test]
    fn prereq_failure_keeps_teardown_error() {
        let teardown = Err(CoreError::Step("Error cleaning up workDir: busy".to_owned()));
        let failure = prereq_failure(&missing_git(), teardown);
        assert_eq!(failure.code, EXIT_FAILURE);
        assert!(failure.message.contains("git: cloning the gadget tree"));
        assert!(failure
            .message
            .ends_with("to skip this check.\nError cleaning up workDir: busy"));
    }
}
