use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use diesel::{prelude::*, PgConnection};
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{self, Actor, AuditEntry};
use crate::auth::RequestMeta;
use crate::enums::{AuditAction, NotificationKind, RequestStatus, ResourceKind, ScheduledStatus};
use crate::history;
use crate::models::{NewGeneratedRequest, NewMaintenanceRequest, Rent, ScheduledTask};
use crate::notify::{self, Fanout};
use crate::recurrence::calculate_next_due_date;
use crate::schema::{generated_requests, leases, maintenance_requests, rents, scheduled_tasks};
use crate::sms;
use crate::state::AppState;

/// How far the claim pushes `next_execution_attempt` into the future. A
/// crashed driver releases the task again after this window.
const CLAIM_WINDOW_MINUTES: i64 = 5;

const RENT_REMINDER_DAYS: i64 = 3;

pub struct Scheduler {
    state: Arc<AppState>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("maintenance scheduler started");
        loop {
            match run_due_tasks(&self.state) {
                Ok(spawned) if spawned > 0 => {
                    info!(spawned, "scheduled maintenance spawned requests");
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "scheduler pass failed"),
            }
            if let Err(err) = send_rent_reminders(&self.state) {
                error!(error = %err, "rent reminder pass failed");
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// One driver pass: claim each due task by CAS on `next_execution_attempt`,
/// spawn its request, advance or complete the schedule. Safe to run from
/// concurrent drivers; the CAS makes each task single-writer.
pub fn run_due_tasks(state: &AppState) -> anyhow::Result<usize> {
    let mut conn = state.db().map_err(|err| anyhow::anyhow!("{err}"))?;
    let now = state.clock.now_naive();

    let due: Vec<ScheduledTask> = scheduled_tasks::table
        .filter(scheduled_tasks::is_active.eq(true))
        .filter(scheduled_tasks::status.eq_any(vec![
            ScheduledStatus::Scheduled.as_str(),
            ScheduledStatus::Active.as_str(),
        ]))
        .filter(scheduled_tasks::next_execution_attempt.le(now))
        .order(scheduled_tasks::next_execution_attempt.asc())
        .load(&mut conn)?;

    let mut spawned = 0usize;
    for task in due {
        let observed = match task.next_execution_attempt {
            Some(attempt) => attempt,
            None => continue,
        };

        let claimed = diesel::update(
            scheduled_tasks::table
                .find(task.id)
                .filter(scheduled_tasks::next_execution_attempt.eq(Some(observed))),
        )
        .set(
            scheduled_tasks::next_execution_attempt
                .eq(Some(now + ChronoDuration::minutes(CLAIM_WINDOW_MINUTES))),
        )
        .execute(&mut conn)?;
        if claimed == 0 {
            // Another driver got there first.
            continue;
        }

        match execute_task(state, &mut conn, &task) {
            Ok(request_id) => {
                spawned += 1;
                notify::dispatch(
                    state,
                    Fanout::new(
                        NotificationKind::MaintenanceDue,
                        format!("Scheduled maintenance \"{}\" is due", task.title),
                        ResourceKind::Request,
                        request_id,
                        task.property_id,
                    )
                    .unit(task.unit_id)
                    .creator(task.created_by_property_user),
                );
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "failed to execute scheduled task");
            }
        }
    }

    Ok(spawned)
}

/// Spawn the request and roll the schedule forward, all in one transaction.
fn execute_task(
    state: &AppState,
    conn: &mut PgConnection,
    task: &ScheduledTask,
) -> anyhow::Result<Uuid> {
    let now = state.clock.now_naive();
    let request_id = Uuid::new_v4();

    let frequency = task.parsed_frequency();
    let anchor = task
        .next_due_date
        .map(|due| due.max(task.scheduled_date))
        .unwrap_or(task.scheduled_date);
    let spawned_after = task.occurrences_spawned + 1;
    let next = calculate_next_due_date(task.recurring, frequency.as_ref(), anchor, spawned_after);

    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        let row = NewMaintenanceRequest {
            id: request_id,
            title: task.title.clone(),
            description: task.description.clone(),
            category: task.category.clone(),
            priority: task.priority.clone(),
            status: RequestStatus::New.as_str().to_string(),
            property_id: task.property_id,
            unit_id: task.unit_id,
            created_by_property_user: task.created_by_property_user,
        };
        diesel::insert_into(maintenance_requests::table)
            .values(&row)
            .execute(conn)?;

        history::append(
            conn,
            ResourceKind::Request,
            request_id,
            RequestStatus::New.as_str(),
            now,
            None,
            Some("Generated from scheduled maintenance"),
        )?;

        diesel::insert_into(generated_requests::table)
            .values(&NewGeneratedRequest {
                scheduled_task_id: task.id,
                request_id,
            })
            .execute(conn)?;

        diesel::update(scheduled_tasks::table.find(task.id))
            .set((
                scheduled_tasks::occurrences_spawned.eq(spawned_after),
                scheduled_tasks::last_generated_request.eq(Some(request_id)),
                scheduled_tasks::last_executed_at.eq(Some(now)),
                scheduled_tasks::updated_at.eq(now),
            ))
            .execute(conn)?;

        match next {
            Some(next_due) => {
                diesel::update(scheduled_tasks::table.find(task.id))
                    .set((
                        scheduled_tasks::status.eq(ScheduledStatus::Scheduled.as_str()),
                        scheduled_tasks::next_due_date.eq(Some(next_due)),
                        scheduled_tasks::next_execution_attempt.eq(Some(next_due)),
                    ))
                    .execute(conn)?;
            }
            None => {
                // No further occurrences: the schedule itself completes.
                diesel::update(scheduled_tasks::table.find(task.id))
                    .set((
                        scheduled_tasks::status.eq(ScheduledStatus::Completed.as_str()),
                        scheduled_tasks::next_due_date.eq(None::<chrono::NaiveDateTime>),
                        scheduled_tasks::next_execution_attempt
                            .eq(None::<chrono::NaiveDateTime>),
                    ))
                    .execute(conn)?;
                history::append(
                    conn,
                    ResourceKind::ScheduledMaintenance,
                    task.id,
                    ScheduledStatus::Completed.as_str(),
                    now,
                    None,
                    Some("Recurrence finished"),
                )?;
            }
        }

        Ok(())
    })?;

    audit::record(
        conn,
        &RequestMeta::default(),
        AuditEntry::success(
            Actor::External("system:scheduler".to_string()),
            AuditAction::Create,
            ResourceKind::Request,
            request_id,
        )
        .with_metadata(json!({ "scheduled_task_id": task.id })),
    );

    Ok(request_id)
}

/// Rent rows due inside the reminder window get one in-app + SMS nudge.
pub fn send_rent_reminders(state: &AppState) -> anyhow::Result<usize> {
    let mut conn = state.db().map_err(|err| anyhow::anyhow!("{err}"))?;
    let now = state.clock.now_naive();
    let horizon = now + ChronoDuration::days(RENT_REMINDER_DAYS);

    let due: Vec<Rent> = rents::table
        .filter(rents::is_active.eq(true))
        .filter(rents::reminder_sent.eq(false))
        .filter(rents::status.eq("pending"))
        .filter(rents::due_date.le(horizon))
        .filter(rents::due_date.ge(now))
        .load(&mut conn)?;

    let mut sent = 0usize;
    for rent in due {
        let lease: Option<(Uuid, Uuid, String)> = leases::table
            .inner_join(crate::schema::properties::table)
            .filter(leases::id.eq(rent.lease_id))
            .select((
                leases::property_id,
                leases::unit_id,
                crate::schema::properties::name,
            ))
            .first(&mut conn)
            .optional()?;
        let Some((property_id, unit_id, property_name)) = lease else {
            continue;
        };

        let claimed = diesel::update(
            rents::table
                .find(rent.id)
                .filter(rents::reminder_sent.eq(false)),
        )
        .set((rents::reminder_sent.eq(true), rents::updated_at.eq(now)))
        .execute(&mut conn)?;
        if claimed == 0 {
            continue;
        }

        let due_date = rent.due_date.date().to_string();
        notify::dispatch(
            state,
            Fanout::new(
                NotificationKind::RentReminder,
                sms::rent_reminder_text(&property_name, rent.amount_cents, &due_date),
                ResourceKind::Rent,
                rent.id,
                property_id,
            )
            .unit(Some(unit_id))
            .assignee(Some(rent.tenant_id)),
        );
        sent += 1;
    }

    Ok(sent)
}
