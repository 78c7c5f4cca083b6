//! Lifecycle callbacks to the control plane (§4.7, §6.3). Each call is
//! best-effort: failures are logged, never propagated, since a dropped
//! status update should not take down the worker.
use std::time::Duration;

use serde::Serialize;

/// The monotone status progression of §3.2 invariant 7. `Failed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    InProgress,
    Complete,
    Stopped,
    Failed,
}

/// The grace period between the HTTP listener coming up and reporting
/// `complete`, chosen to outlast an upstream load balancer's refresh of its
/// backend list (at most 5s) plus margin (§4.7).
pub const COMPLETE_REPORT_DELAY: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct UpdateStatusBody {
    status: Status,
}

pub struct StatusReporter {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    job_token: String,
}

impl StatusReporter {
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>, job_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model_id: model_id.into(),
            job_token: job_token.into(),
        }
    }

    pub async fn report(&self, status: Status) {
        let url = format!(
            "{}/api/v2/deploy/{}/update-status",
            self.base_url, self.model_id
        );
        let result = self
            .client
            .post(&url)
            .bearer_auth(&self.job_token)
            .json(&UpdateStatusBody { status })
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            tracing::warn!(?status, error = %e, "failed to report status to control plane");
        } else {
            tracing::info!(?status, "reported status to control plane");
        }
    }

    /// Schedules the `complete` report [`COMPLETE_REPORT_DELAY`] after the
    /// HTTP listener starts accepting connections (§4.7).
    pub fn report_complete_after_delay(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(COMPLETE_REPORT_DELAY).await;
            self.report(Status::Complete).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_control_plane_does_not_panic() {
        let reporter = StatusReporter::new("http://127.0.0.1:1", "model1", "job-token");
        // Best-effort: must not panic or propagate an error.
        reporter.report(Status::InProgress).await;
    }
}
