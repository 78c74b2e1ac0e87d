use gshub_common::InstanceStatus;

/// Events that may move an instance between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Startup callback: the workload is reachable.
    Startup,
    /// Shutdown callback: the workload went away.
    Shutdown,
    /// Owner-requested power on/off. Power state lives at the provider only.
    PowerChange,
    Terminate,
}

/// Status an instance moves to when `event` happens in `from`.
/// `None` means the event is rejected (only ever the case for terminated instances).
pub fn next_status(from: InstanceStatus, event: LifecycleEvent) -> Option<InstanceStatus> {
    use InstanceStatus::*;
    use LifecycleEvent::*;

    match (from, event) {
        (Terminated, _) => None,
        (_, Startup) => Some(Ready),
        (Ready | Stopped, Shutdown) => Some(Stopped),
        // Went down before ever reporting ready.
        (Provisioning | Failed, Shutdown) => Some(Failed),
        (s, PowerChange) => Some(s),
        (_, Terminate) => Some(Terminated),
    }
}
