//! Progress state machine of a builder run.
//!
//! ```text
//! Stopped | Waiting --report_running--> Running(current = 0)
//! Running --report_progress / report_status--> Running
//! Running --report_waiting--> Waiting
//! Waiting --report_status--> Waiting
//! Running --output--> Running(current = total) --> Stopped
//! any --failure--> Error
//! ```
//!
//! Every transition publishes a [`BuilderProgressReport`] on the job's
//! `progress` channel, stamped with the run id, builder and target.

use std::sync::{Mutex, MutexGuard};

use crate::core::builder_types::{BuilderInfo, BuilderProgressReport, BuilderProgressState};
use crate::core::target::Target;
use crate::jobs::handler::JobChannel;

struct Tracked {
    state: BuilderProgressState,
    current: u64,
    total: u64,
    status: String,
}

/// Tracks and publishes the progress of one builder run.
pub struct ProgressReporter {
    channel: JobChannel,
    id: u64,
    builder: BuilderInfo,
    target: Option<Target>,
    tracked: Mutex<Tracked>,
}

impl ProgressReporter {
    pub(crate) fn new(channel: JobChannel, id: u64, builder: BuilderInfo, target: Option<Target>) -> Self {
        ProgressReporter {
            channel,
            id,
            builder,
            target,
            tracked: Mutex::new(Tracked {
                state: BuilderProgressState::Stopped,
                current: 0,
                total: 1,
                status: String::new(),
            }),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> BuilderProgressState {
        self.tracked().state
    }

    /// Enter `Running` from `Waiting` or `Stopped`, resetting `current` to 0.
    pub fn report_running(&self) {
        let mut tracked = self.tracked();
        if matches!(tracked.state, BuilderProgressState::Waiting | BuilderProgressState::Stopped) {
            tracked.current = 0;
            self.publish_running(&mut tracked, None);
        }
    }

    /// Enter `Waiting` from `Running`, for a run blocked on work it does not
    /// drive itself. `report_running` resumes it.
    pub fn report_waiting(&self, status: Option<String>) {
        let mut tracked = self.tracked();
        if tracked.state != BuilderProgressState::Running {
            return;
        }
        tracked.state = BuilderProgressState::Waiting;
        if let Some(status) = status {
            tracked.status = status;
        }
        let status = (!tracked.status.is_empty()).then(|| tracked.status.clone());
        self.publish(BuilderProgressState::Waiting, None, None, status, None);
    }

    /// Update the status text. Ignored unless running or waiting.
    pub fn report_status(&self, status: impl Into<String>) {
        let status = status.into();
        let mut tracked = self.tracked();
        match tracked.state {
            BuilderProgressState::Running => self.publish_running(&mut tracked, Some(status)),
            BuilderProgressState::Waiting => {
                tracked.status = status.clone();
                self.publish(BuilderProgressState::Waiting, None, None, Some(status), None);
            }
            _ => {}
        }
    }

    /// Update progress counters. Ignored unless running.
    pub fn report_progress(&self, current: u64, total: Option<u64>, status: Option<String>) {
        let mut tracked = self.tracked();
        if tracked.state != BuilderProgressState::Running {
            return;
        }
        tracked.current = current;
        if let Some(total) = total {
            tracked.total = total;
        }
        self.publish_running(&mut tracked, status);
    }

    /// Report one finished output: `Running(current = total)` then `Stopped`.
    pub(crate) fn report_output(&self) {
        let mut tracked = self.tracked();
        tracked.current = tracked.total;
        self.publish_running(&mut tracked, None);
        tracked.state = BuilderProgressState::Stopped;
        self.publish(BuilderProgressState::Stopped, None, None, None, None);
    }

    /// Report a failed run.
    pub(crate) fn report_error(&self, error: impl Into<String>) {
        let mut tracked = self.tracked();
        tracked.state = BuilderProgressState::Error;
        self.publish(BuilderProgressState::Error, None, None, None, Some(error.into()));
    }

    fn publish_running(&self, tracked: &mut Tracked, status: Option<String>) {
        tracked.state = BuilderProgressState::Running;
        if let Some(status) = status {
            tracked.status = status;
        }
        let status = (!tracked.status.is_empty()).then(|| tracked.status.clone());
        self.publish(
            BuilderProgressState::Running,
            Some(tracked.current),
            Some(tracked.total),
            status,
            None,
        );
    }

    fn publish(
        &self,
        state: BuilderProgressState,
        current: Option<u64>,
        total: Option<u64>,
        status: Option<String>,
        error: Option<String>,
    ) {
        let report = BuilderProgressReport {
            id: self.id,
            builder: self.builder.clone(),
            target: self.target.clone(),
            state,
            current,
            total,
            status,
            error,
        };
        match serde_json::to_value(&report) {
            Ok(value) => self.channel.send(value),
            Err(e) => tracing::warn!("failed to serialize progress report: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::JobScope;
    use crate::jobs::types::{JobId, JobOutboundMessage, JobOutboundMessageKind};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn reporter() -> (ProgressReporter, mpsc::UnboundedReceiver<JobOutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scope = JobScope::new(JobId::next(), tx);
        let channel = scope.create_channel("progress").unwrap();
        let info = BuilderInfo::new("pkg:b", "", json!(true));
        (ProgressReporter::new(channel, 7, info, None), rx)
    }

    fn reports(rx: &mut mpsc::UnboundedReceiver<JobOutboundMessage>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let JobOutboundMessageKind::ChannelMessage { message, .. } = message.kind {
                out.push(message);
            }
        }
        out
    }

    #[test]
    fn test_running_then_output() {
        let (progress, mut rx) = reporter();
        progress.report_running();
        progress.report_progress(3, Some(10), Some("compiling".into()));
        progress.report_output();

        let reports = reports(&mut rx);
        let states: Vec<&str> = reports.iter().map(|r| r["state"].as_str().unwrap()).collect();
        assert_eq!(states, vec!["running", "running", "running", "stopped"]);
        assert_eq!(reports[0]["current"], json!(0));
        assert_eq!(reports[1]["status"], json!("compiling"));
        assert_eq!(reports[2]["current"], json!(10));
        assert_eq!(reports[2]["total"], json!(10));
        assert_eq!(reports[0]["id"], json!(7));
        assert_eq!(reports[0]["builder"]["builderName"], json!("pkg:b"));
    }

    #[test]
    fn test_status_and_progress_ignored_when_stopped() {
        let (progress, mut rx) = reporter();
        progress.report_status("ignored");
        progress.report_progress(1, None, None);
        assert!(reports(&mut rx).is_empty());
        assert_eq!(progress.state(), BuilderProgressState::Stopped);
    }

    #[test]
    fn test_waiting_between_running_phases() {
        let (progress, mut rx) = reporter();
        progress.report_waiting(Some("ignored".into()));
        assert!(reports(&mut rx).is_empty());

        progress.report_running();
        progress.report_waiting(Some("children".into()));
        progress.report_status("still waiting");
        assert_eq!(progress.state(), BuilderProgressState::Waiting);
        progress.report_running();
        progress.report_output();

        let reports = reports(&mut rx);
        let states: Vec<&str> = reports.iter().map(|r| r["state"].as_str().unwrap()).collect();
        assert_eq!(states, vec!["running", "waiting", "waiting", "running", "running", "stopped"]);
        assert_eq!(reports[1]["status"], json!("children"));
        assert_eq!(reports[2]["status"], json!("still waiting"));
        assert_eq!(reports[3]["current"], json!(0));
    }

    #[test]
    fn test_report_running_only_from_idle_states() {
        let (progress, mut rx) = reporter();
        progress.report_running();
        progress.report_running();
        assert_eq!(reports(&mut rx).len(), 1);

        progress.report_error("boom");
        progress.report_running();
        let reports = reports(&mut rx);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["state"], json!("error"));
        assert_eq!(reports[0]["error"], json!("boom"));
    }
}
