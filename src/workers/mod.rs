use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{complete_job, fail_job, requeue_job, reserve_job, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod email;
pub mod scheduler;
pub mod sms;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

/// Drains the jobs table one reservation at a time. Provider dispatch lives
/// here, post-commit and at-most-once; the notification rows written by the
/// fan-out are the durable record.
pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.job_type(), handler))
                .collect(),
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("job worker started");
        loop {
            let worked = match self.drain_one().await {
                Ok(worked) => worked,
                Err(err) => {
                    error!(error = %err, "worker pass failed");
                    false
                }
            };
            if !worked {
                sleep(self.poll_interval).await;
            }
        }
    }

    /// Reserve and run at most one job. Returns whether anything was picked
    /// up, so the caller knows when to back off.
    async fn drain_one(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let Ok(mut conn) = self.state.db() else {
            error!("worker could not reach the database pool");
            return Ok(false);
        };
        let reserved = reserve_job(&mut conn, &job_types)?;
        drop(conn);

        let Some(job) = reserved else {
            return Ok(false);
        };

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };
        self.settle(&job, outcome)?;
        Ok(true)
    }

    fn settle(&self, job: &Job, outcome: JobExecution) -> Result<(), JobQueueError> {
        let Ok(mut conn) = self.state.db() else {
            error!(job_id = %job.id, "could not record job outcome: no database connection");
            return Ok(());
        };

        match outcome {
            JobExecution::Success => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed");
                complete_job(&mut conn, job.id)
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, %error, "job will retry");
                requeue_job(&mut conn, job.id, delay, &error)
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                fail_job(&mut conn, job.id, &error)
            }
        }
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(email::SendEmailJob::new()),
        Arc::new(sms::SendSmsJob::new()),
    ]
}
