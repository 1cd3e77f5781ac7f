use crate::detector::Classification;
use crate::engine::EngineProcess;

/// What the supervisor should do with the current engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    KeepPolling,
    TerminateAndRotate,
    TerminateAndStop,
}

pub fn act(classification: Classification) -> RotationAction {
    match classification {
        Classification::Continue => RotationAction::KeepPolling,
        Classification::JobFinished
        | Classification::AccountExhausted
        | Classification::Stalled => RotationAction::TerminateAndRotate,
        Classification::AllDone => RotationAction::TerminateAndStop,
    }
}

/// Best-effort kill. Rotation proceeds whether or not the process could be
/// torn down; it is usually already gone on the job-finished path.
pub async fn terminate_quietly(process: &mut EngineProcess) {
    if let Err(e) = process.terminate().await {
        log::warn!("failed to terminate engine process: {e}");
    }
}
