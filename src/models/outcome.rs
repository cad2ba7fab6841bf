use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// States a provisioning session moves through for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    Resolved,
    Locked,
    Pushed,
    Diffed,
    Committed,
    RolledBack,
    Unlocked,
}

/// One step of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    Resolve,
    Lock,
    Push,
    Diff,
    Commit,
    Rollback,
    Unlock,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::Resolve => "resolve",
            Stage::Lock => "lock",
            Stage::Push => "push",
            Stage::Diff => "diff",
            Stage::Commit => "commit",
            Stage::Rollback => "rollback",
            Stage::Unlock => "unlock",
            Stage::Close => "close",
        };
        f.write_str(name)
    }
}

/// What happened to the candidate configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Candidate differed and was committed
    Committed,
    /// Candidate differed and was discarded because commit was not requested
    RolledBack,
    /// Candidate matched the active configuration
    Unchanged,
    /// A stage failed before a decision could be made
    Aborted,
}

/// Result of a single stage; `error` is set when the stage failed
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// ProvisioningOutcome summarises one provisioning call
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningOutcome {
    pub host: String,
    pub decision: Decision,
    /// Last state reached before the session was closed. The session itself always
    /// ends disconnected; the `close` stage report records that step.
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub stages: Vec<StageReport>,
    /// Template files that rendered as empty fragments because of an error
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_templates: Vec<String>,
    /// Failure outside any stage, such as a panic in the provisioning task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningOutcome {
    /// Outcome for a run that died before it could report its stages
    pub fn crashed(
        host: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            decision: Decision::Aborted,
            state: SessionState::Disconnected,
            diff: None,
            stages: Vec::new(),
            failed_templates: Vec::new(),
            error: Some(error.into()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// No stage failed, nothing was left degraded and a decision was reached
    pub fn succeeded(&self) -> bool {
        self.decision != Decision::Aborted
            && self.error.is_none()
            && self.failed_templates.is_empty()
            && self.first_failure().is_none()
    }

    /// Stages that were attempted, in order
    pub fn attempted(&self) -> Vec<Stage> {
        self.stages.iter().map(|s| s.stage).collect()
    }

    /// First failed stage, if any
    pub fn first_failure(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| !s.ok())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}
