use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::enums::{GlobalRole, PropertyRole};
use crate::error::{AppError, AppResult};
use crate::models::PropertyUser;
use crate::schema::property_users;

/// What the caller is trying to do to a work item (request or scheduled
/// task). Creation and feedback carry extra constraints and are checked at
/// the call sites on top of this resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Assign,
    Delete,
    Verify,
    Reopen,
    Archive,
    Cancel,
    Comment,
    AdvanceStatus,
    ManagePublicLink,
}

/// Ownership facts about the resource being touched. `creator_user_id` is
/// the user behind `created_by_property_user`, already resolved.
#[derive(Debug, Clone, Copy)]
pub struct WorkItemScope {
    pub property_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub creator_user_id: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
}

/// Rule-ordered evaluation from §authorization: first allow wins, anything
/// unmatched is a deny. Pure over the caller's active associations so it can
/// be tested without a store.
fn evaluate(
    user: &AuthenticatedUser,
    action: Action,
    scope: &WorkItemScope,
    associations: &[PropertyUser],
) -> bool {
    if user.role == GlobalRole::Admin {
        return true;
    }

    if scope.creator_user_id == Some(user.user_id)
        && matches!(action, Action::Read | Action::Update)
    {
        return true;
    }

    if scope.assignee_user_id == Some(user.user_id)
        && matches!(action, Action::Read | Action::Comment | Action::AdvanceStatus)
    {
        return true;
    }

    let on_property = associations
        .iter()
        .filter(|pu| pu.property_id == scope.property_id && pu.is_active);

    for association in on_property.clone() {
        if association.has_management_role() {
            return true;
        }
    }

    if user.role == GlobalRole::Tenant
        && matches!(action, Action::Read | Action::Comment)
        && scope.unit_id.is_some()
    {
        for association in on_property {
            if association.unit_id == scope.unit_id && association.has_role(PropertyRole::Tenant) {
                return true;
            }
        }
    }

    false
}

/// Authorize `action` on a work item. Fail-closed: a store error during
/// evaluation resolves to deny, never to an internal error the caller could
/// mistake for an allow.
pub fn authorize_work_item(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    action: Action,
    scope: &WorkItemScope,
) -> AppResult<()> {
    let associations = match load_active_associations(conn, user.user_id, scope.property_id) {
        Ok(rows) => rows,
        Err(_) => return Err(AppError::forbidden()),
    };

    if evaluate(user, action, scope, &associations) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

pub fn load_active_associations(
    conn: &mut PgConnection,
    user_id: Uuid,
    property_id: Uuid,
) -> QueryResult<Vec<PropertyUser>> {
    property_users::table
        .filter(property_users::user_id.eq(user_id))
        .filter(property_users::property_id.eq(property_id))
        .filter(property_users::is_active.eq(true))
        .load(conn)
}

/// Management rights over a property: admin, or an active association
/// carrying landlord / propertymanager / admin_access.
pub fn has_management_access(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    property_id: Uuid,
) -> bool {
    if user.role == GlobalRole::Admin {
        return true;
    }
    match load_active_associations(conn, user.user_id, property_id) {
        Ok(rows) => rows.iter().any(PropertyUser::has_management_role),
        Err(_) => false,
    }
}

pub fn ensure_management(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    property_id: Uuid,
) -> AppResult<()> {
    if has_management_access(conn, user, property_id) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

/// A tenant may open requests on the unit their association points at.
pub fn is_tenant_on_unit(
    conn: &mut PgConnection,
    user_id: Uuid,
    property_id: Uuid,
    unit_id: Uuid,
) -> bool {
    match load_active_associations(conn, user_id, property_id) {
        Ok(rows) => rows
            .iter()
            .any(|pu| pu.unit_id == Some(unit_id) && pu.has_role(PropertyRole::Tenant)),
        Err(_) => false,
    }
}

/// Property ids the user can list resources under (any active association;
/// admins are handled by the callers before reaching this).
pub fn associated_property_ids(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Vec<Uuid>> {
    property_users::table
        .filter(property_users::user_id.eq(user_id))
        .filter(property_users::is_active.eq(true))
        .select(property_users::property_id)
        .distinct()
        .load(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn association(
        user_id: Uuid,
        property_id: Uuid,
        unit_id: Option<Uuid>,
        roles: &[&str],
        is_active: bool,
    ) -> PropertyUser {
        let now = Utc::now().naive_utc();
        PropertyUser {
            id: Uuid::new_v4(),
            user_id,
            property_id,
            unit_id,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_active,
            start_date: now,
            end_date: None,
            lease_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn caller(role: GlobalRole) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "caller@example.com".into(),
            role,
        }
    }

    #[test]
    fn admin_always_allowed() {
        let user = caller(GlobalRole::Admin);
        let scope = WorkItemScope {
            property_id: Uuid::new_v4(),
            unit_id: None,
            creator_user_id: None,
            assignee_user_id: None,
        };
        assert!(evaluate(&user, Action::Delete, &scope, &[]));
    }

    #[test]
    fn creator_may_read_and_update_but_not_delete() {
        let user = caller(GlobalRole::Tenant);
        let scope = WorkItemScope {
            property_id: Uuid::new_v4(),
            unit_id: None,
            creator_user_id: Some(user.user_id),
            assignee_user_id: None,
        };
        assert!(evaluate(&user, Action::Read, &scope, &[]));
        assert!(evaluate(&user, Action::Update, &scope, &[]));
        assert!(!evaluate(&user, Action::Delete, &scope, &[]));
    }

    #[test]
    fn assignee_may_advance_status() {
        let user = caller(GlobalRole::Vendor);
        let scope = WorkItemScope {
            property_id: Uuid::new_v4(),
            unit_id: None,
            creator_user_id: None,
            assignee_user_id: Some(user.user_id),
        };
        assert!(evaluate(&user, Action::AdvanceStatus, &scope, &[]));
        assert!(!evaluate(&user, Action::Verify, &scope, &[]));
    }

    #[test]
    fn management_association_grants_lifecycle_actions() {
        let user = caller(GlobalRole::PropertyManager);
        let property_id = Uuid::new_v4();
        let scope = WorkItemScope {
            property_id,
            unit_id: None,
            creator_user_id: None,
            assignee_user_id: None,
        };
        let rows = vec![association(
            user.user_id,
            property_id,
            None,
            &["propertymanager"],
            true,
        )];
        for action in [
            Action::Read,
            Action::Update,
            Action::Assign,
            Action::Verify,
            Action::Reopen,
            Action::Archive,
            Action::Cancel,
        ] {
            assert!(evaluate(&user, action, &scope, &rows), "{action:?}");
        }
    }

    #[test]
    fn inactive_association_does_not_count() {
        let user = caller(GlobalRole::Landlord);
        let property_id = Uuid::new_v4();
        let scope = WorkItemScope {
            property_id,
            unit_id: None,
            creator_user_id: None,
            assignee_user_id: None,
        };
        let rows = vec![association(
            user.user_id,
            property_id,
            None,
            &["landlord"],
            false,
        )];
        assert!(!evaluate(&user, Action::Read, &scope, &rows));
    }

    #[test]
    fn tenant_limited_to_their_own_unit() {
        let user = caller(GlobalRole::Tenant);
        let property_id = Uuid::new_v4();
        let unit_id = Uuid::new_v4();
        let other_unit = Uuid::new_v4();
        let rows = vec![association(
            user.user_id,
            property_id,
            Some(unit_id),
            &["tenant"],
            true,
        )];

        let own = WorkItemScope {
            property_id,
            unit_id: Some(unit_id),
            creator_user_id: None,
            assignee_user_id: None,
        };
        let foreign = WorkItemScope {
            unit_id: Some(other_unit),
            ..own
        };

        assert!(evaluate(&user, Action::Read, &own, &rows));
        assert!(evaluate(&user, Action::Comment, &own, &rows));
        assert!(!evaluate(&user, Action::Read, &foreign, &rows));
        assert!(!evaluate(&user, Action::Update, &own, &rows));
    }
}
