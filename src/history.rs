use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::enums::ResourceKind;
use crate::models::{NewStatusHistoryEntry, StatusHistoryEntry};
use crate::schema::status_history;

/// Append one entry to a resource's status history. The table is append-only;
/// rows are never updated or deleted outside a cascade.
pub fn append(
    conn: &mut PgConnection,
    context: ResourceKind,
    context_id: Uuid,
    status: &str,
    changed_at: NaiveDateTime,
    changed_by: Option<Uuid>,
    notes: Option<&str>,
) -> QueryResult<()> {
    let entry = NewStatusHistoryEntry {
        id: Uuid::new_v4(),
        context_type: context.as_str().to_string(),
        context_id,
        status: status.to_string(),
        changed_at,
        changed_by,
        notes: notes.map(|n| n.to_string()),
    };
    diesel::insert_into(status_history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

pub fn for_context(
    conn: &mut PgConnection,
    context: ResourceKind,
    context_id: Uuid,
) -> QueryResult<Vec<StatusHistoryEntry>> {
    status_history::table
        .filter(status_history::context_type.eq(context.as_str()))
        .filter(status_history::context_id.eq(context_id))
        .order(status_history::changed_at.asc())
        .load(conn)
}

pub fn delete_for_context(
    conn: &mut PgConnection,
    context: ResourceKind,
    context_id: Uuid,
) -> QueryResult<usize> {
    diesel::delete(
        status_history::table
            .filter(status_history::context_type.eq(context.as_str()))
            .filter(status_history::context_id.eq(context_id)),
    )
    .execute(conn)
}
