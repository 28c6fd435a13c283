use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::{SyncOrchestrator, WorkTimeJob};

/// Owns the background job scheduler. One ticket sync fires as soon as the
/// scheduler starts; outside mock mode it then repeats every `interval`, and
/// each work time job repeats every `work_time_interval` when configured.
pub struct SyncScheduler {
    scheduler: JobScheduler,
    running: bool,
}

impl SyncScheduler {
    pub async fn build(
        orchestrator: Arc<SyncOrchestrator>,
        interval: Duration,
        work_time_interval: Duration,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await.context("creating scheduler")?;

        let startup = Arc::clone(&orchestrator);
        let job = Job::new_one_shot_async(Duration::ZERO, move |_uuid, _lock| {
            let orchestrator = Arc::clone(&startup);
            Box::pin(async move {
                orchestrator.run_once().await;
            })
        })
        .context("creating startup sync job")?;
        scheduler.add(job).await.context("adding startup sync job")?;

        if orchestrator.is_mock() {
            info!("mock data mode; seeding once without recurring sync");
        } else {
            let recurring = Arc::clone(&orchestrator);
            let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
                let orchestrator = Arc::clone(&recurring);
                Box::pin(async move {
                    orchestrator.run_once().await;
                })
            })
            .with_context(|| format!("creating recurring sync job every {interval:?}"))?;
            scheduler.add(job).await.context("adding recurring sync job")?;

            if orchestrator.work_time().is_configured() {
                for work_job in WorkTimeJob::ALL {
                    let work_time = Arc::clone(orchestrator.work_time());
                    let job = Job::new_repeated_async(work_time_interval, move |_uuid, _lock| {
                        let work_time = Arc::clone(&work_time);
                        Box::pin(async move {
                            work_time.run(work_job).await;
                        })
                    })
                    .with_context(|| format!("creating {} job", work_job.as_str()))?;
                    scheduler.add(job).await.context("adding work time job")?;
                }
            }
        }

        Ok(Self {
            scheduler,
            running: false,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.scheduler.start().await.context("starting scheduler")?;
        self.running = true;
        info!("sync scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.scheduler.shutdown().await.context("stopping scheduler")?;
        self.running = false;
        info!("sync scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
