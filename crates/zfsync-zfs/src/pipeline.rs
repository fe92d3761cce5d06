//! Replication pipelines: `send` → optional meter → `receive`.
//!
//! Every spawned process is held by a [`Stage`]. A stage that goes out of
//! scope without having been waited on is killed and reaped, so any early
//! return (spawn failure, wait error) leaves no process behind. The normal
//! path waits on the consumer first, terminates the upstream stages if the
//! consumer failed, then reaps them.

use crate::command::{exit_code, send_args};
use crate::connection::Connection;
use log::{debug, info, warn};
use std::process::{Child, ChildStdout, Command, Stdio};
use zfsync_core::error::{PipelineFailure, StageFailure, StageRole, ZfsyncError, ZfsyncResult};
use zfsync_core::TransferCfg;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// A running pipeline process that is always reaped.
#[derive(Debug)]
pub struct Stage {
    role: StageRole,
    command: Vec<String>,
    child: Option<Child>,
    terminated: bool,
}

/// Exit information for a reaped stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub role: StageRole,
    pub command: Vec<String>,
    /// Exit code, or `-1` when the process ended on a signal.
    pub status: i32,
    /// Signal that ended the process, if any.
    pub signal: Option<i32>,
    /// Whether a termination signal was sent before reaping.
    pub terminated: bool,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    fn failure(&self) -> Option<StageFailure> {
        (!self.success()).then(|| StageFailure {
            stage: self.role,
            command: self.command.clone(),
            status: self.status,
        })
    }
}

impl Stage {
    pub(crate) fn spawn(
        role: StageRole,
        command: Vec<String>,
        stdin: Stdio,
        stdout: Stdio,
    ) -> ZfsyncResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ZfsyncError::InvalidConfig(format!("empty {role} command line")))?;
        let child = Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ZfsyncError::Spawn {
                command: command.clone(),
                source,
            })?;
        debug!("{role} started (pid {}): {}", child.id(), command.join(" "));

        Ok(Self {
            role,
            command,
            child: Some(child),
            terminated: false,
        })
    }

    pub fn role(&self) -> StageRole {
        self.role
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Take the read end of this stage's output pipe.
    pub fn take_stdout(&mut self) -> ZfsyncResult<ChildStdout> {
        self.child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| {
                ZfsyncError::Io(std::io::Error::other(format!(
                    "{} stdout is not available",
                    self.role
                )))
            })
    }

    /// Send a termination signal without reaping.
    ///
    /// The signal is SIGKILL (`Child::kill`), not SIGTERM: a stage blocked on
    /// a dead pipe or ignoring SIGTERM would otherwise keep the following
    /// reap waiting forever, since no wait has a timeout.
    pub fn terminate(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("terminating {} (pid {})", self.role, child.id());
            if let Err(err) = child.kill() {
                debug!("{} kill returned {err}", self.role);
            }
            self.terminated = true;
        }
    }

    /// Block until the process exits and collect its status.
    pub fn wait(mut self) -> ZfsyncResult<StageOutcome> {
        let Some(child) = self.child.as_mut() else {
            return Err(ZfsyncError::Io(std::io::Error::other(format!(
                "{} already reaped",
                self.role
            ))));
        };
        let status = child.wait()?;
        self.child = None;

        #[cfg(unix)]
        let signal = status.signal();
        #[cfg(not(unix))]
        let signal = None;

        Ok(StageOutcome {
            role: self.role,
            command: std::mem::take(&mut self.command),
            status: exit_code(status),
            signal,
            terminated: self.terminated,
        })
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(
                "{} (pid {}) abandoned; killing and reaping",
                self.role,
                child.id()
            );
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Command line for the progress meter: binary, configured args, buffer size.
pub fn meter_command(cfg: &TransferCfg) -> Vec<String> {
    let mut argv = vec![cfg.meter_binary.clone()];
    argv.extend(cfg.meter_args.iter().cloned());
    argv.push(cfg.buffer_size.to_string());
    argv
}

/// Outcome of a clean transfer, one entry per stage in pipeline order.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub stages: Vec<StageOutcome>,
}

/// A snapshot replication from one connection to another.
#[derive(Debug, Clone)]
pub struct Transfer {
    source: String,
    destination: String,
    incremental_from: Option<String>,
    meter: Option<Vec<String>>,
}

impl Transfer {
    /// Replicate snapshot `source` into dataset `destination`.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            incremental_from: None,
            meter: None,
        }
    }

    /// Send only the changes since `snapshot`.
    pub fn incremental_from(mut self, snapshot: impl Into<String>) -> Self {
        self.incremental_from = Some(snapshot.into());
        self
    }

    /// Insert a pass-through meter between producer and consumer.
    pub fn with_meter(mut self, command: Vec<String>) -> Self {
        self.meter = Some(command);
        self
    }

    /// Add the configured meter when `cfg.show_progress` is set.
    pub fn with_config(self, cfg: &TransferCfg) -> Self {
        if cfg.show_progress {
            self.with_meter(meter_command(cfg))
        } else {
            self
        }
    }

    pub fn producer_command(&self, source: &Connection) -> Vec<String> {
        source
            .target()
            .command(send_args(&self.source, self.incremental_from.as_deref()))
    }

    /// Run the pipeline to completion.
    ///
    /// Fails with `PipelineFailed` unless every stage exits with status 0; on
    /// success `destination`'s cache is invalidated.
    pub fn run(
        &self,
        source: &Connection,
        destination: &mut Connection,
    ) -> ZfsyncResult<TransferReport> {
        info!(
            "transfer {}:{} -> {}:{}{}",
            source.target().host(),
            self.source,
            destination.target().host(),
            self.destination,
            self.incremental_from
                .as_deref()
                .map(|from| format!(" (incremental from {from})"))
                .unwrap_or_default()
        );

        let mut producer = source.send(&self.source, self.incremental_from.as_deref())?;
        let producer_stdout = producer.take_stdout()?;

        let (mut meter, consumer_input) = match &self.meter {
            Some(command) => {
                let mut meter = Stage::spawn(
                    StageRole::Meter,
                    command.clone(),
                    Stdio::from(producer_stdout),
                    Stdio::piped(),
                )?;
                let meter_stdout = meter.take_stdout()?;
                (Some(meter), Stdio::from(meter_stdout))
            }
            None => (None, Stdio::from(producer_stdout)),
        };

        let consumer = destination.receive(&self.destination, consumer_input)?;
        let consumer_outcome = consumer.wait()?;

        if !consumer_outcome.success() {
            warn!(
                "consumer exited with status {}; stopping upstream stages",
                consumer_outcome.status
            );
            producer.terminate();
            if let Some(meter) = meter.as_mut() {
                meter.terminate();
            }
        }

        let producer_outcome = producer.wait()?;
        let meter_outcome = meter.map(Stage::wait).transpose()?;

        let mut stages = vec![producer_outcome];
        stages.extend(meter_outcome);
        stages.push(consumer_outcome);

        let failures: Vec<StageFailure> = stages.iter().filter_map(StageOutcome::failure).collect();
        let terminated: Vec<StageRole> = stages
            .iter()
            .filter(|outcome| outcome.terminated)
            .map(|outcome| outcome.role)
            .collect();
        if let Some(failure) = PipelineFailure::new(failures, terminated) {
            return Err(failure.into());
        }

        destination.invalidate();
        info!(
            "transfer into {}:{} complete",
            destination.target().host(),
            self.destination
        );
        Ok(TransferReport { stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_command_appends_buffer_size() {
        let cfg = TransferCfg {
            meter_binary: "pv".into(),
            meter_args: vec!["-q".into(), "-B".into()],
            buffer_size: 65536,
            show_progress: true,
        };
        assert_eq!(meter_command(&cfg), ["pv", "-q", "-B", "65536"]);
    }

    #[test]
    fn config_toggles_meter() {
        let mut cfg = TransferCfg::default();
        assert!(Transfer::new("a@s", "b").with_config(&cfg).meter.is_none());
        cfg.show_progress = true;
        assert_eq!(
            Transfer::new("a@s", "b").with_config(&cfg).meter,
            Some(vec![
                "clpbar".to_string(),
                "-dan".to_string(),
                "-bs".to_string(),
                "1048576".to_string()
            ])
        );
    }

    #[test]
    fn dropped_stage_is_killed_and_reaped() {
        let stage = Stage::spawn(
            StageRole::Producer,
            vec!["sleep".into(), "30".into()],
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();
        let pid = stage.pid().unwrap();
        drop(stage);

        #[cfg(target_os = "linux")]
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
        #[cfg(not(target_os = "linux"))]
        let _ = pid;
    }

    #[test]
    fn terminate_uses_sigkill_even_when_sigterm_is_ignored() {
        let mut stage = Stage::spawn(
            StageRole::Producer,
            vec![
                "sh".into(),
                "-c".into(),
                "trap '' TERM; exec sleep 30".into(),
            ],
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();
        stage.terminate();
        let outcome = stage.wait().unwrap();
        assert!(outcome.terminated);
        #[cfg(unix)]
        assert_eq!(outcome.signal, Some(9));
    }

    #[test]
    fn terminated_stage_reports_signal() {
        let mut stage = Stage::spawn(
            StageRole::Meter,
            vec!["sleep".into(), "30".into()],
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();
        stage.terminate();
        let outcome = stage.wait().unwrap();
        assert!(outcome.terminated);
        assert!(!outcome.success());
        assert_eq!(outcome.status, -1);
        #[cfg(unix)]
        assert_eq!(outcome.signal, Some(9));
    }
}
