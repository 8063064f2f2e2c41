use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{jobs::JOB_SEND_SMS, state::AppState};

use super::{JobExecution, JobHandler};

const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Deserialize)]
struct SendSmsPayload {
    #[allow(dead_code)]
    notification_id: Option<Uuid>,
    to: String,
    body: String,
}

pub struct SendSmsJob;

impl SendSmsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendSmsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendSmsJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_SMS
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: SendSmsPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid sms payload: {err}"),
                }
            }
        };

        match state.sms.send(&payload.to, &payload.body).await {
            Ok(()) => JobExecution::Success,
            Err(err) => {
                warn!(job_id = %job.id, to = %payload.to, error = %err, "sms dispatch failed");
                if job.attempts >= MAX_ATTEMPTS {
                    JobExecution::Failed {
                        error: err.to_string(),
                    }
                } else {
                    JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err.to_string(),
                    }
                }
            }
        }
    }
}
