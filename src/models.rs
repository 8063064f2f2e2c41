use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub registration_status: String,
    pub notification_preferences: Value,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Missing preference keys default to opted-in.
    pub fn wants_email(&self, notification_type: &str) -> bool {
        self.notification_preferences
            .get(notification_type)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub registration_status: String,
    pub notification_preferences: Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = vendors)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = vendors)]
pub struct NewVendor {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = properties)]
pub struct Property {
    pub id: Uuid,
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = properties)]
pub struct NewProperty {
    pub id: Uuid,
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = units)]
#[diesel(belongs_to(Property))]
pub struct Unit {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
    pub floor: Option<i32>,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rent_amount_cents: i64,
    pub status: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = units)]
pub struct NewUnit {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
    pub floor: Option<i32>,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub rent_amount_cents: i64,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = unit_tenants)]
#[diesel(belongs_to(Unit))]
#[diesel(belongs_to(User))]
#[diesel(primary_key(unit_id, user_id))]
pub struct UnitTenant {
    pub unit_id: Uuid,
    pub user_id: Uuid,
    pub assigned_at: NaiveDateTime,
    pub assigned_by: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = unit_tenants)]
pub struct NewUnitTenant {
    pub unit_id: Uuid,
    pub user_id: Uuid,
    pub assigned_by: Option<Uuid>,
}

/// The bridge row binding one user to one property (and optionally one unit)
/// with a set of property-scoped roles. Uniqueness over the full triple is
/// enforced by the store.
#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = property_users)]
#[diesel(belongs_to(Property))]
#[diesel(belongs_to(User))]
pub struct PropertyUser {
    pub id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub is_active: bool,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub lease_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PropertyUser {
    pub fn has_role(&self, role: crate::enums::PropertyRole) -> bool {
        self.roles.iter().any(|held| held == role.as_str())
    }

    pub fn has_management_role(&self) -> bool {
        self.roles
            .iter()
            .filter_map(|held| crate::enums::PropertyRole::parse(held))
            .any(|role| role.is_management())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = property_users)]
pub struct NewPropertyUser {
    pub id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub start_date: NaiveDateTime,
    pub lease_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = maintenance_requests)]
#[diesel(belongs_to(Property))]
pub struct MaintenanceRequest {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub created_by_property_user: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub assigned_to_model: Option<String>,
    pub assigned_by_property_user: Option<Uuid>,
    pub assigned_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub verified_by: Option<Uuid>,
    pub feedback_rating: Option<i32>,
    pub feedback_comment: Option<String>,
    pub feedback_submitted_at: Option<NaiveDateTime>,
    pub feedback_submitted_by: Option<Uuid>,
    pub public_token: Option<String>,
    pub public_link_enabled: bool,
    pub public_link_expires_at: Option<NaiveDateTime>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = maintenance_requests)]
pub struct NewMaintenanceRequest {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub created_by_property_user: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = scheduled_tasks)]
#[diesel(belongs_to(Property))]
pub struct ScheduledTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub created_by_property_user: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub assigned_to_model: Option<String>,
    pub scheduled_date: NaiveDateTime,
    pub recurring: bool,
    pub frequency: Option<Value>,
    pub occurrences_spawned: i32,
    pub next_due_date: Option<NaiveDateTime>,
    pub next_execution_attempt: Option<NaiveDateTime>,
    pub last_executed_at: Option<NaiveDateTime>,
    pub last_generated_request: Option<Uuid>,
    pub public_link_token: Option<String>,
    pub public_link_enabled: bool,
    pub public_link_expires: Option<NaiveDateTime>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ScheduledTask {
    pub fn parsed_frequency(&self) -> Option<crate::recurrence::Frequency> {
        self.frequency
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scheduled_tasks)]
pub struct NewScheduledTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub created_by_property_user: Uuid,
    pub scheduled_date: NaiveDateTime,
    pub recurring: bool,
    pub frequency: Option<Value>,
    pub next_due_date: Option<NaiveDateTime>,
    pub next_execution_attempt: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = generated_requests)]
pub struct GeneratedRequest {
    pub scheduled_task_id: Uuid,
    pub request_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = generated_requests)]
pub struct NewGeneratedRequest {
    pub scheduled_task_id: Uuid,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = status_history)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub context_type: String,
    pub context_id: Uuid,
    pub status: String,
    pub changed_at: NaiveDateTime,
    pub changed_by: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = status_history)]
pub struct NewStatusHistoryEntry {
    pub id: Uuid,
    pub context_type: String,
    pub context_id: Uuid,
    pub status: String,
    pub changed_at: NaiveDateTime,
    pub changed_by: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: Uuid,
    pub context_type: String,
    pub context_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub message: String,
    pub is_external: bool,
    pub external_user_name: Option<String>,
    pub external_user_email: Option<String>,
    pub is_internal_note: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub context_type: String,
    pub context_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub message: String,
    pub is_external: bool,
    pub external_user_name: Option<String>,
    pub external_user_email: Option<String>,
    pub is_internal_note: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = media)]
pub struct Media {
    pub id: Uuid,
    pub s3_key: String,
    pub thumbnail_key: Option<String>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
    pub related_to: String,
    pub related_id: Uuid,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = media)]
pub struct NewMedia {
    pub id: Uuid,
    pub s3_key: String,
    pub thumbnail_key: Option<String>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_by: Option<Uuid>,
    pub related_to: String,
    pub related_id: Uuid,
    pub is_public: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub notification_type: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub related_resource_type: Option<String>,
    pub related_resource_id: Option<Uuid>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub context_data: Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub notification_type: String,
    pub message: String,
    pub link: Option<String>,
    pub related_resource_type: Option<String>,
    pub related_resource_id: Option<Uuid>,
    pub context_data: Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub external_actor: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub status: String,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub external_actor: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub status: String,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = leases)]
pub struct Lease {
    pub id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub monthly_rent_cents: i64,
    pub currency: String,
    pub payment_due_day: i32,
    pub deposit_cents: i64,
    pub status: String,
    pub version: i32,
    pub renewal_notice_sent: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = leases)]
pub struct NewLease {
    pub id: Uuid,
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub landlord_id: Uuid,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub monthly_rent_cents: i64,
    pub currency: String,
    pub payment_due_day: i32,
    pub deposit_cents: i64,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = lease_amendments)]
#[diesel(belongs_to(Lease))]
pub struct LeaseAmendment {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub description: String,
    pub changes: Value,
    pub amended_by: Option<Uuid>,
    pub effective_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = lease_amendments)]
pub struct NewLeaseAmendment {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub description: String,
    pub changes: Value,
    pub amended_by: Option<Uuid>,
    pub effective_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = rents)]
#[diesel(belongs_to(Lease))]
pub struct Rent {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub amount_cents: i64,
    pub due_date: NaiveDateTime,
    pub status: String,
    pub paid_at: Option<NaiveDateTime>,
    pub reminder_sent: bool,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rents)]
pub struct NewRent {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub tenant_id: Uuid,
    pub amount_cents: i64,
    pub due_date: NaiveDateTime,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
