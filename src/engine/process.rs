use crate::engine::command::EngineCommand;
use crate::error::{Error, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Non-fatal by policy: the supervisor logs these and rotates anyway.
#[derive(Debug, thiserror::Error)]
pub enum TerminationFailure {
    #[error("failed to signal engine process: {0}")]
    Signal(#[source] std::io::Error),

    #[error("failed to reap engine process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Handle to the one live engine instance. Bound to exactly one identity;
/// torn down on rotation, stall, quota, or run completion.
pub struct EngineProcess {
    child: Child,
    engine_pid: Option<u32>,
}

impl EngineProcess {
    /// Launch failure is fatal to the whole run: there is nothing to monitor.
    pub fn start(command: &EngineCommand) -> Result<Self> {
        let child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(Error::Launch)?;
        log::info!(
            "launched {} (local pid {})",
            command.binary,
            child.id().map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        Ok(Self {
            child,
            engine_pid: None,
        })
    }

    pub fn local_pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Record the pid the engine reports over its control channel.
    pub fn bind_engine_pid(&mut self, pid: u32) {
        self.engine_pid = Some(pid);
        log::debug!("engine reports pid {pid}");
    }

    pub fn engine_pid(&self) -> Option<u32> {
        self.engine_pid
    }

    pub async fn terminate(&mut self) -> std::result::Result<(), TerminationFailure> {
        self.child.start_kill().map_err(TerminationFailure::Signal)?;
        self.child.wait().await.map_err(TerminationFailure::Wait)?;
        Ok(())
    }
}

/// Verify the engine binary is present and runnable before any identity is
/// launched.
pub async fn preflight(binary: &str) -> Result<()> {
    Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            Error::Config(format!(
                "copy engine {binary:?} is not runnable ({e}); \
                 install rclone first: https://rclone.org/downloads/"
            ))
        })?;
    Ok(())
}

/// Run a short-lived engine subcommand to completion and return its stdout.
pub async fn run_probe(command: &EngineCommand) -> Result<String> {
    let output = command
        .to_command()
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(Error::Launch)?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "engine {} probe failed with {}: {}",
            command.subcommand,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_command() -> EngineCommand {
        EngineCommand {
            binary: "sleep".to_string(),
            subcommand: "30",
            flags: vec![],
            targets: vec![],
        }
    }

    #[tokio::test]
    async fn starts_and_terminates_a_child() {
        let mut process = EngineProcess::start(&sleep_command()).unwrap();
        assert!(process.local_pid().is_some());
        process.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn terminating_an_already_dead_child_is_tolerable() {
        let command = EngineCommand {
            binary: "true".to_string(),
            subcommand: "",
            flags: vec![],
            targets: vec![],
        };
        let mut process = EngineProcess::start(&command).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        // either outcome is acceptable to callers, which swallow the error
        let _ = process.terminate().await;
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let command = EngineCommand {
            binary: "definitely-not-a-real-engine".to_string(),
            subcommand: "copy",
            flags: vec![],
            targets: vec![],
        };
        assert!(matches!(
            EngineProcess::start(&command),
            Err(Error::Launch(_))
        ));
    }

    #[tokio::test]
    async fn preflight_rejects_a_missing_binary() {
        let err = preflight("definitely-not-a-real-engine").await.unwrap_err();
        assert!(err.to_string().contains("not runnable"));
    }

    #[tokio::test]
    async fn preflight_accepts_a_present_binary() {
        preflight("sleep").await.unwrap();
    }
}
