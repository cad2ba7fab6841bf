use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::compose::Composer;
use crate::config::{PushOptions, SessionConfig};
use crate::device::{is_trivial_diff, Connector, DeviceError, DeviceSession, SessionGuard};
use crate::models::*;

/// Provisioner pushes a host's rendered configuration through a locked
/// candidate-diff-commit session.
///
/// Stage order: connect, resolve, lock, push, diff, commit or rollback, unlock, close.
/// A failed lock, push or diff stops the device-mutating stages; a failed push or
/// diff also discards the candidate. Once lock has been attempted, unlock is always
/// attempted, and a connected session is always closed.
pub struct Provisioner<C: Connector> {
    composer: Composer,
    connector: C,
    session_config: SessionConfig,
    push: PushOptions,
}

impl<C: Connector> Provisioner<C> {
    pub fn new(
        composer: Composer,
        connector: C,
        session_config: SessionConfig,
        push: PushOptions,
    ) -> Self {
        Self {
            composer,
            connector,
            session_config,
            push,
        }
    }

    /// Provision one host. `commit` selects commit over rollback when the candidate differs.
    pub fn provision(&self, host: &mut NetworkHost, commit: bool) -> ProvisioningOutcome {
        let span = tracing::info_span!("host", name = %host.name);
        let _enter = span.enter();

        let mut run = Run::new(Utc::now());

        tracing::debug!("Connecting to device: {}", host.host_name);
        let connected = self.connector.connect(&host.host_name, &self.session_config);
        let Some(session) = run.record(Stage::Connect, connected) else {
            return run.finish(host, Decision::Aborted, None);
        };
        run.state = SessionState::Connected;

        let mut session = SessionGuard::new(session);
        let (decision, diff) = self.apply(&mut *session, host, commit, &mut run);

        session.close();
        run.stages.push(StageReport {
            stage: Stage::Close,
            error: None,
        });

        run.finish(host, decision, diff)
    }

    fn apply(
        &self,
        session: &mut C::Session,
        host: &mut NetworkHost,
        commit: bool,
        run: &mut Run,
    ) -> (Decision, Option<String>) {
        let candidate = self.composer.render_candidate(host);
        run.failed_templates = candidate
            .failed
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        if candidate.is_empty() {
            tracing::error!("No configuration rendered for {}", host.name);
            run.fail(Stage::Resolve, "no configuration rendered");
            return (Decision::Aborted, None);
        }
        run.stages.push(StageReport {
            stage: Stage::Resolve,
            error: None,
        });
        run.state = SessionState::Resolved;
        if !run.failed_templates.is_empty() {
            tracing::warn!(
                "{} template(s) failed to render for {}: {}",
                run.failed_templates.len(),
                host.name,
                run.failed_templates.join(", ")
            );
        }

        let locked = run.record(Stage::Lock, session.lock()).is_some();
        let mut decision = Decision::Aborted;
        let mut diff = None;

        if locked {
            run.state = SessionState::Locked;
            (decision, diff) =
                self.push_and_decide(session, host, &candidate.fragments, commit, run);
        }

        // Unlock even after a failed lock; a lock held by another session is
        // simply refused by the device.
        if run.record(Stage::Unlock, session.unlock()).is_some() && locked {
            run.state = SessionState::Unlocked;
        }

        (decision, diff)
    }

    fn push_and_decide(
        &self,
        session: &mut C::Session,
        host: &NetworkHost,
        candidate: &[String],
        commit: bool,
        run: &mut Run,
    ) -> (Decision, Option<String>) {
        let pushed = session.load_config(candidate, self.push.format, self.push.merge);
        if run.record(Stage::Push, pushed).is_none() {
            discard(session, run);
            return (Decision::Aborted, None);
        }
        run.state = SessionState::Pushed;

        let Some(diff) = run.record(Stage::Diff, session.diff(0)) else {
            discard(session, run);
            return (Decision::Aborted, None);
        };
        run.state = SessionState::Diffed;

        if is_trivial_diff(&diff) {
            tracing::info!("No configuration changes for {}", host.host_name);
            return (Decision::Unchanged, Some(diff));
        }

        tracing::info!("Configuration changes for {}: {}", host.host_name, diff);

        let decision = if commit {
            if run.record(Stage::Commit, session.commit()).is_some() {
                run.state = SessionState::Committed;
                Decision::Committed
            } else {
                discard(session, run);
                Decision::Aborted
            }
        } else if run.record(Stage::Rollback, session.rollback()).is_some() {
            run.state = SessionState::RolledBack;
            Decision::RolledBack
        } else {
            Decision::Aborted
        };

        (decision, Some(diff))
    }
}

/// Provision every host on the blocking pool, at most `concurrency` at a time.
/// Outcomes come back in input order, one per host. A host whose task panics is
/// reported as crashed without affecting the others.
pub async fn provision_all<C>(
    provisioner: Arc<Provisioner<C>>,
    hosts: Vec<NetworkHost>,
    commit: bool,
    concurrency: usize,
) -> Vec<ProvisioningOutcome>
where
    C: Connector + Send + Sync + 'static,
{
    let run_started = Utc::now();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let names: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
    let mut tasks = JoinSet::new();

    for (index, mut host) in hosts.into_iter().enumerate() {
        let provisioner = provisioner.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let started_at = Utc::now();
            let name = host.name.clone();
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    tokio::task::spawn_blocking(move || provisioner.provision(&mut host, commit))
                        .await
                        .map_err(join_failure)
                }
                Err(e) => Err(e.to_string()),
            };
            let outcome = result.unwrap_or_else(|e| {
                tracing::error!("Provisioning {} failed: {}", name, e);
                ProvisioningOutcome::crashed(name, started_at, e)
            });
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<ProvisioningOutcome>> = vec![None; names.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                if let Some(slot) = outcomes.get_mut(index) {
                    *slot = Some(outcome);
                }
            }
            Err(e) => tracing::error!("Provisioning task failed: {}", e),
        }
    }

    outcomes
        .into_iter()
        .zip(names)
        .map(|(outcome, name)| {
            outcome.unwrap_or_else(|| {
                let error = "provisioning task did not complete";
                ProvisioningOutcome::crashed(name, run_started, error)
            })
        })
        .collect()
}

fn join_failure(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("panicked: {}", message)
        }
        Err(err) => err.to_string(),
    }
}

/// Best-effort discard of an uncommitted candidate
fn discard<S: DeviceSession>(session: &mut S, run: &mut Run) {
    tracing::warn!("Discarding candidate configuration");
    run.record(Stage::Rollback, session.rollback());
}

/// Accumulates stage reports for one provisioning call
struct Run {
    started_at: DateTime<Utc>,
    stages: Vec<StageReport>,
    state: SessionState,
    failed_templates: Vec<String>,
}

impl Run {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            stages: Vec::new(),
            state: SessionState::Disconnected,
            failed_templates: Vec::new(),
        }
    }

    /// Record the outcome of a stage, logging failures. Returns the value on success.
    fn record<T>(&mut self, stage: Stage, result: Result<T, DeviceError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.stages.push(StageReport { stage, error: None });
                Some(value)
            }
            Err(e) => {
                tracing::error!("{} failed: {}", stage, e);
                self.stages.push(StageReport {
                    stage,
                    error: Some(e.to_string()),
                });
                None
            }
        }
    }

    fn fail(&mut self, stage: Stage, error: &str) {
        self.stages.push(StageReport {
            stage,
            error: Some(error.to_string()),
        });
    }

    fn finish(
        self,
        host: &NetworkHost,
        decision: Decision,
        diff: Option<String>,
    ) -> ProvisioningOutcome {
        ProvisioningOutcome {
            host: host.name.clone(),
            decision,
            state: self.state,
            diff,
            stages: self.stages,
            failed_templates: self.failed_templates,
            error: None,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
