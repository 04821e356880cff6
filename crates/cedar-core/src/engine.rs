use crate::{join_results, CoreError};
use tracing::debug;

/// A build variant driven through setup, run and teardown.
pub trait Engine {
    /// Validate flags and the definition, plan the steps, and prepare the
    /// work directory.
    fn setup(&mut self) -> Result<(), CoreError>;

    fn run(&mut self) -> Result<(), CoreError>;

    /// Remove an owned work directory or checkpoint a user-supplied one.
    fn teardown(&mut self) -> Result<(), CoreError>;

    /// Resolve the release series the image is built for.
    fn set_series(&mut self) -> Result<(), CoreError>;
}

/// Drive `engine` through a full build.
pub fn execute(engine: &mut dyn Engine) -> Result<(), CoreError> {
    engine.setup()?;
    run_and_teardown(engine)
}

/// Run a set-up engine, then tear it down whether or not the run
/// succeeded. A teardown failure is joined onto the run failure.
pub fn run_and_teardown(engine: &mut dyn Engine) -> Result<(), CoreError> {
    let run = engine.run();
    if let Err(e) = &run {
        debug!("run failed, tearing down: {e}");
    }
    join_results(run, engine.teardown())
}
