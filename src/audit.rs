use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::auth::RequestMeta;
use crate::enums::{AuditAction, ResourceKind};
use crate::models::NewAuditLog;
use crate::schema::audit_logs;

const MAX_SNAPSHOT_BYTES: usize = 16 * 1024;

/// Who performed the operation. External identities come from public-link
/// traffic where only a token (or a name) is known.
#[derive(Debug, Clone)]
pub enum Actor {
    User(Uuid),
    External(String),
}

pub struct AuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub resource_type: ResourceKind,
    pub resource_id: Option<Uuid>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn success(
        actor: Actor,
        action: AuditAction,
        resource_type: ResourceKind,
        resource_id: Uuid,
    ) -> Self {
        Self {
            actor,
            action,
            resource_type,
            resource_id: Some(resource_id),
            old_value: None,
            new_value: None,
            success: true,
            error_message: None,
            metadata: json!({}),
        }
    }

    pub fn with_change(mut self, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append one activity-log row. Never propagates an error into the caller:
/// a sink failure is logged and swallowed.
pub fn record(conn: &mut PgConnection, meta: &RequestMeta, entry: AuditEntry) {
    let (actor_id, external_actor) = match entry.actor {
        Actor::User(id) => (Some(id), None),
        Actor::External(identifier) => (None, Some(identifier)),
    };

    let row = NewAuditLog {
        id: Uuid::new_v4(),
        actor_id,
        external_actor,
        action: entry.action.as_str().to_string(),
        resource_type: entry.resource_type.as_str().to_string(),
        resource_id: entry.resource_id,
        old_value: entry.old_value.map(truncate_snapshot),
        new_value: entry.new_value.map(truncate_snapshot),
        status: if entry.success { "success" } else { "failure" }.to_string(),
        error_message: entry.error_message,
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
        metadata: entry.metadata,
    };

    if let Err(err) = diesel::insert_into(audit_logs::table)
        .values(&row)
        .execute(conn)
    {
        error!(
            action = %row.action,
            resource_type = %row.resource_type,
            error = %err,
            "failed to append audit log entry"
        );
    }
}

fn truncate_snapshot(value: Value) -> Value {
    match serde_json::to_string(&value) {
        Ok(serialized) if serialized.len() > MAX_SNAPSHOT_BYTES => {
            json!({ "truncated": true, "bytes": serialized.len() })
        }
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_snapshots_are_replaced_with_a_marker() {
        let big = json!({ "blob": "x".repeat(MAX_SNAPSHOT_BYTES + 1) });
        let truncated = truncate_snapshot(big);
        assert_eq!(truncated.get("truncated"), Some(&json!(true)));
    }

    #[test]
    fn small_snapshots_pass_through() {
        let small = json!({ "title": "Leak" });
        assert_eq!(truncate_snapshot(small.clone()), small);
    }
}
