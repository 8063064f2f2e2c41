use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    jobs::JOB_SEND_EMAIL,
    mailer::EmailMessage,
    schema::notifications,
    state::AppState,
};

use super::{JobExecution, JobHandler};

const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Deserialize)]
struct SendEmailPayload {
    notification_id: Option<Uuid>,
    to: String,
    subject: String,
    html: String,
    text: String,
}

pub struct SendEmailJob;

impl SendEmailJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: SendEmailPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        let message = EmailMessage {
            to: payload.to.clone(),
            subject: payload.subject,
            html: payload.html,
            text: payload.text,
        };

        match state.mailer.send(message).await {
            Ok(()) => {
                if let Some(notification_id) = payload.notification_id {
                    stamp_sent(&state, notification_id);
                }
                JobExecution::Success
            }
            Err(err) => {
                warn!(job_id = %job.id, to = %payload.to, error = %err, "email dispatch failed");
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

fn stamp_sent(state: &AppState, notification_id: Uuid) {
    let Ok(mut conn) = state.db() else {
        warn!(%notification_id, "could not stamp sent_at: no database connection");
        return;
    };
    if let Err(err) = diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::sent_at.eq(Some(state.clock.now_naive())),
            notifications::updated_at.eq(state.clock.now_naive()),
        ))
        .execute(&mut conn)
    {
        warn!(%notification_id, error = %err, "could not stamp sent_at");
    }
}
