//! Error taxonomy shared by every zfsync crate.
//!
//! Tree lookups surface `NotFound`, use of a removed node surfaces
//! `InvalidatedNode`, and external tooling surfaces `CommandFailed` or the
//! composite `PipelineFailed`. Nothing here is ever downgraded to a log line;
//! callers decide whether to re-list and retry.

use std::fmt;
use thiserror::Error;

pub type ZfsyncResult<T> = Result<T, ZfsyncError>;

#[derive(Debug, Error)]
pub enum ZfsyncError {
    /// A pool, dataset, or snapshot does not exist where it was searched for.
    #[error("no such dataset or snapshot `{name}` at {context}")]
    NotFound { name: String, context: String },

    /// A removed node was used or observed during traversal.
    #[error("node {0} has been invalidated")]
    InvalidatedNode(String),

    /// Two siblings share a name and kind, which the tree never allows.
    #[error("duplicate child `{name}` under {parent}")]
    DuplicateChild { name: String, parent: String },

    #[error("malformed listing record `{line}`: {reason}")]
    MalformedListing { line: String, reason: String },

    /// An external command exited with a non-zero status.
    ///
    /// `stderr` carries the tool's own diagnostic, trimmed, and is empty when
    /// the tool printed nothing.
    #[error("command `{}` exited with status {status}{}", .command.join(" "), diagnostic_suffix(.stderr))]
    CommandFailed {
        command: Vec<String>,
        status: i32,
        stderr: String,
    },

    #[error("failed to start `{}`: {source}", .command.join(" "))]
    Spawn {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    PipelineFailed(PipelineFailure),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn diagnostic_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl ZfsyncError {
    pub fn not_found(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::NotFound {
            name: name.into(),
            context: context.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Role a process plays inside a replication pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Producer,
    Meter,
    Consumer,
}

impl StageRole {
    /// Lower rank wins when several stages fail.
    fn precedence(self) -> u8 {
        match self {
            StageRole::Consumer => 0,
            StageRole::Producer => 1,
            StageRole::Meter => 2,
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageRole::Producer => "producer",
            StageRole::Meter => "meter",
            StageRole::Consumer => "consumer",
        };
        f.write_str(label)
    }
}

/// A single stage that exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: StageRole,
    pub command: Vec<String>,
    pub status: i32,
}

/// Every failed stage of one transfer, ordered by reporting precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    failures: Vec<StageFailure>,
    terminated: Vec<StageRole>,
}

impl PipelineFailure {
    /// Returns `None` when `failures` is empty, since an all-clean pipeline is not a failure.
    ///
    /// `terminated` lists the stages that were sent a termination signal before being reaped.
    pub fn new(mut failures: Vec<StageFailure>, terminated: Vec<StageRole>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        failures.sort_by_key(|failure| failure.stage.precedence());
        Some(Self {
            failures,
            terminated,
        })
    }

    pub fn terminated(&self) -> &[StageRole] {
        &self.terminated
    }

    pub fn was_terminated(&self, role: StageRole) -> bool {
        self.terminated.contains(&role)
    }

    /// The failure reported to the caller: consumer, then producer, then meter.
    pub fn primary(&self) -> &StageFailure {
        &self.failures[0]
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    pub fn stage(&self, role: StageRole) -> Option<&StageFailure> {
        self.failures.iter().find(|failure| failure.stage == role)
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primary = self.primary();
        write!(
            f,
            "replication pipeline failed: {} `{}` exited with status {}",
            primary.stage,
            primary.command.join(" "),
            primary.status
        )?;
        let others: Vec<String> = self.failures[1..]
            .iter()
            .map(|failure| format!("{} (status {})", failure.stage, failure.status))
            .collect();
        if !others.is_empty() {
            write!(f, "; also failed: {}", others.join(", "))?;
        }
        Ok(())
    }
}

impl From<PipelineFailure> for ZfsyncError {
    fn from(failure: PipelineFailure) -> Self {
        ZfsyncError::PipelineFailed(failure)
    }
}
