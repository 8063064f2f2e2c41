use std::collections::HashMap;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::enums::{NotificationKind, PropertyRole, ResourceKind};
use crate::jobs::{enqueue_job, JOB_SEND_EMAIL, JOB_SEND_SMS};
use crate::models::{NewNotification, PropertyUser, User};
use crate::schema::{property_users, users};
use crate::sms;
use crate::state::AppState;

/// One fan-out, described by the event and the ownership facts needed to
/// compute its recipient set.
pub struct Fanout {
    pub kind: NotificationKind,
    pub message: String,
    pub link: Option<String>,
    pub resource_type: ResourceKind,
    pub resource_id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub creator_property_user: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub context_data: Value,
}

impl Fanout {
    pub fn new(
        kind: NotificationKind,
        message: impl Into<String>,
        resource_type: ResourceKind,
        resource_id: Uuid,
        property_id: Uuid,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            link: None,
            resource_type,
            resource_id,
            property_id,
            unit_id: None,
            creator_property_user: None,
            assignee_user_id: None,
            actor_user_id: None,
            context_data: json!({}),
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn unit(mut self, unit_id: Option<Uuid>) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn creator(mut self, property_user_id: Uuid) -> Self {
        self.creator_property_user = Some(property_user_id);
        self
    }

    pub fn assignee(mut self, user_id: Option<Uuid>) -> Self {
        self.assignee_user_id = user_id;
        self
    }

    pub fn actor(mut self, user_id: Uuid) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn context(mut self, context_data: Value) -> Self {
        self.context_data = context_data;
        self
    }
}

/// Post-commit fan-out. Runs outside any transaction; every failure is
/// per-recipient, logged, and swallowed so the originating operation never
/// observes it.
pub fn dispatch(state: &AppState, fanout: Fanout) {
    let mut conn = match state.db() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %err, "notification fan-out skipped: no database connection");
            return;
        }
    };

    let recipients = match compute_recipients(&mut conn, &fanout) {
        Ok(recipients) => recipients,
        Err(err) => {
            warn!(error = %err, kind = %fanout.kind, "failed to compute notification recipients");
            return;
        }
    };

    for recipient in recipients {
        if let Err(err) = deliver_to(&mut conn, state, &fanout, &recipient) {
            warn!(
                recipient = %recipient.id,
                kind = %fanout.kind,
                error = %err,
                "failed to deliver notification"
            );
        }
    }
}

/// Union of interested parties, deduplicated by user id, minus the actor:
/// the creator, the assignee (when it is a user), every manager on the
/// property, and (for unit-scoped events) the tenants of that unit.
fn compute_recipients(conn: &mut PgConnection, fanout: &Fanout) -> QueryResult<Vec<User>> {
    let mut ids: Vec<Uuid> = Vec::new();

    if let Some(creator_pu) = fanout.creator_property_user {
        let creator: Option<PropertyUser> = property_users::table
            .find(creator_pu)
            .first(conn)
            .optional()?;
        if let Some(creator) = creator {
            ids.push(creator.user_id);
        }
    }

    if let Some(assignee) = fanout.assignee_user_id {
        ids.push(assignee);
    }

    let management_roles: Vec<&str> = PropertyRole::ALL
        .iter()
        .filter(|role| role.is_management())
        .map(|role| role.as_str())
        .collect();
    let managers: Vec<Uuid> = property_users::table
        .filter(property_users::property_id.eq(fanout.property_id))
        .filter(property_users::is_active.eq(true))
        .filter(property_users::roles.overlaps_with(management_roles))
        .select(property_users::user_id)
        .distinct()
        .load(conn)?;
    ids.extend(managers);

    if let Some(unit_id) = fanout.unit_id {
        let tenants: Vec<Uuid> = property_users::table
            .filter(property_users::property_id.eq(fanout.property_id))
            .filter(property_users::unit_id.eq(unit_id))
            .filter(property_users::is_active.eq(true))
            .filter(property_users::roles.contains(vec![PropertyRole::Tenant.as_str()]))
            .select(property_users::user_id)
            .distinct()
            .load(conn)?;
        ids.extend(tenants);
    }

    let unique_ids = dedup_minus_actor(ids, fanout.actor_user_id);
    if unique_ids.is_empty() {
        return Ok(Vec::new());
    }

    users::table
        .filter(users::id.eq_any(&unique_ids))
        .filter(users::is_active.eq(true))
        .load(conn)
}

fn dedup_minus_actor(ids: Vec<Uuid>, actor: Option<Uuid>) -> Vec<Uuid> {
    let mut seen: HashMap<Uuid, ()> = HashMap::new();
    ids.into_iter()
        .filter(|id| Some(*id) != actor)
        .filter(|id| seen.insert(*id, ()).is_none())
        .collect()
}

/// In-app row always; email and SMS are queued as jobs honoring the
/// recipient's preferences and the kind's SMS policy.
fn deliver_to(
    conn: &mut PgConnection,
    state: &AppState,
    fanout: &Fanout,
    recipient: &User,
) -> anyhow::Result<()> {
    let notification_id = Uuid::new_v4();
    let row = NewNotification {
        id: notification_id,
        recipient_id: recipient.id,
        sender_id: fanout.actor_user_id,
        notification_type: fanout.kind.as_str().to_string(),
        message: fanout.message.clone(),
        link: fanout.link.clone(),
        related_resource_type: Some(fanout.resource_type.as_str().to_string()),
        related_resource_id: Some(fanout.resource_id),
        context_data: fanout.context_data.clone(),
    };

    diesel::insert_into(crate::schema::notifications::table)
        .values(&row)
        .execute(conn)?;

    if recipient.wants_email(fanout.kind.as_str()) {
        enqueue_job(
            conn,
            JOB_SEND_EMAIL,
            json!({
                "notification_id": notification_id,
                "to": recipient.email,
                "subject": subject_for(fanout.kind),
                "html": format!("<p>{}</p>", fanout.message),
                "text": fanout.message,
            }),
            None,
        )?;
    }

    if fanout.kind.sms_enabled() {
        if let Some(phone) = recipient.phone.as_deref().filter(|p| !p.is_empty()) {
            let body = match fanout.kind {
                NotificationKind::RequestStatusChanged | NotificationKind::RequestAssigned => {
                    let title = fanout
                        .context_data
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("maintenance request");
                    let status = fanout
                        .context_data
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("updated");
                    sms::request_update_text(title, status)
                }
                _ => fanout.message.clone(),
            };
            enqueue_job(
                conn,
                JOB_SEND_SMS,
                json!({
                    "notification_id": notification_id,
                    "to": phone,
                    "body": body,
                }),
                None,
            )?;
        }
    }

    Ok(())
}

fn subject_for(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::RequestCreated => "New maintenance request",
        NotificationKind::RequestAssigned => "Maintenance request assigned",
        NotificationKind::RequestStatusChanged => "Maintenance request updated",
        NotificationKind::RequestCommented => "New comment on maintenance request",
        NotificationKind::FeedbackSubmitted => "Feedback received",
        NotificationKind::MaintenanceDue => "Scheduled maintenance due",
        NotificationKind::LeaseCreated => "Lease created",
        NotificationKind::LeaseTerminated => "Lease terminated",
        NotificationKind::RentReminder => "Rent reminder",
        NotificationKind::UnitAssigned => "Unit assignment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_preserves_first_occurrence_and_drops_actor() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let out = dedup_minus_actor(vec![a, actor, b, a, b], Some(actor));
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn no_actor_keeps_everyone_once() {
        let a = Uuid::new_v4();
        let out = dedup_minus_actor(vec![a, a], None);
        assert_eq!(out, vec![a]);
    }
}
