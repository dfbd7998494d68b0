use std::{ops::Sub, time::Duration};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::FireContext;
use crate::schedule::ScheduleSpec;

/// A job that can be driven by a [`JobRunner`].
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn schedule(&self) -> &ScheduleSpec;

    /// Handle a single fire. Errors are handled by the job, the schedule always continues.
    async fn fire(&self, context: FireContext);
}

/// Fires a job on every boundary of its schedule until cancelled.
///
/// A fire is always awaited before the next boundary is computed, so fires of one runner never
/// overlap. A fire that overruns one or more boundaries is followed by a single fire at the next
/// upcoming boundary.
pub(crate) struct JobRunner<J> {
    job: J,
}

impl<J> JobRunner<J>
where
    J: ScheduledJob + 'static,
{
    pub(crate) fn new(job: J) -> Self {
        Self { job }
    }

    pub(crate) fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let trigger_name = self.job.schedule().trigger_name().to_owned();
            loop {
                let Some(next) = self.job.schedule().next_fire_after(Utc::now()) else {
                    tracing::error!("No future fire time for {trigger_name}");
                    break;
                };
                let delay = next
                    .sub(Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let fired_at = Utc::now().max(next);
                        self.job.fire(FireContext { scheduled_for: next, fired_at }).await;
                        let delay = next - Utc::now();
                        if delay > TimeDelta::zero() {
                            tokio::time::sleep(delay.to_std().unwrap_or(Duration::ZERO)).await;
                        }
                    },
                    _ = cancellation_token.cancelled() => {
                        break;
                    },
                }
            }
            tracing::debug!("Shutting down {trigger_name}");
        })
    }
}
