/// Where the [`Orchestrator`](super::Orchestrator) reports how far a run has come.
///
/// The pipeline only hands over callbacks; implementations poll them at their own pace,
/// so reporting never slows the workers down.
pub trait Progress: Send + Sync {
    /// Label the current stage of the run, such as "Discovering" or "Harvesting".
    fn set_phase(&self, phase: &str);

    /// Report counted work. The callback yields `(total, done, message)`.
    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>);

    /// Report open-ended work, such as repository discovery. The callback yields the message.
    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>);

    /// Emit a finished-milestone line, such as a persisted repository.
    fn println(&self, msg: &str);

    /// The run is over; tear the indicator down.
    fn done(&self);
}
