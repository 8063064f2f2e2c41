use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed vocabularies shared by the whole backend. Every value that reaches
/// the store goes through one of these types first; the store itself only
/// ever sees the `as_str` form.
macro_rules! closed_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub const ALL: &'static [$name] = &[$(Self::$variant,)+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_set! {
    /// Global role carried on the user row itself.
    GlobalRole {
        Admin => "admin",
        Landlord => "landlord",
        PropertyManager => "propertymanager",
        Tenant => "tenant",
        Vendor => "vendor",
    }
}

closed_set! {
    RegistrationStatus {
        PendingEmailVerification => "pending_email_verification",
        PendingPasswordSet => "pending_password_set",
        Active => "active",
        Suspended => "suspended",
        Deactivated => "deactivated",
    }
}

closed_set! {
    /// Property-scoped roles held on a PropertyUser association.
    PropertyRole {
        Landlord => "landlord",
        PropertyManager => "propertymanager",
        Tenant => "tenant",
        VendorAccess => "vendor_access",
        AdminAccess => "admin_access",
        User => "user",
        Vendor => "vendor",
    }
}

impl PropertyRole {
    /// Roles that grant management rights on a property.
    pub fn is_management(&self) -> bool {
        matches!(
            self,
            Self::Landlord | Self::PropertyManager | Self::AdminAccess
        )
    }
}

closed_set! {
    RequestStatus {
        New => "new",
        Assigned => "assigned",
        InProgress => "in_progress",
        Completed => "completed",
        Verified => "verified",
        Reopened => "reopened",
        Archived => "archived",
        Cancelled => "cancelled",
    }
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Cancelled)
    }

    /// Legal forward transitions of the request state machine. Cancellation
    /// is handled separately since it is permitted from any non-terminal
    /// state (management only).
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (New, Assigned) => true,
            (Assigned, InProgress) => true,
            (InProgress, Completed) => true,
            (Completed, Verified) => true,
            (Completed, Reopened) | (Verified, Reopened) => true,
            (Reopened, InProgress) => true,
            (Completed, Archived) | (Verified, Archived) | (Reopened, Archived) => true,
            _ => false,
        }
    }
}

closed_set! {
    ScheduledStatus {
        Scheduled => "scheduled",
        Active => "active",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        Paused => "paused",
    }
}

impl ScheduledStatus {
    /// Legacy rows carry `active`; the driver treats both as runnable.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Active)
    }
}

closed_set! {
    LeaseStatus {
        Active => "active",
        PendingRenewal => "pending_renewal",
        Terminated => "terminated",
        Expired => "expired",
    }
}

closed_set! {
    UnitStatus {
        Vacant => "vacant",
        Occupied => "occupied",
        UnderMaintenance => "under_maintenance",
        Unavailable => "unavailable",
    }
}

closed_set! {
    FrequencyType {
        Daily => "daily",
        Weekly => "weekly",
        BiWeekly => "bi_weekly",
        Monthly => "monthly",
        Quarterly => "quarterly",
        Yearly => "yearly",
        CustomDays => "custom_days",
    }
}

closed_set! {
    RequestCategory {
        Plumbing => "plumbing",
        Electrical => "electrical",
        Hvac => "hvac",
        Appliance => "appliance",
        Structural => "structural",
        Pest => "pest",
        Cleaning => "cleaning",
        Landscaping => "landscaping",
        General => "general",
        Other => "other",
    }
}

closed_set! {
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

closed_set! {
    RentStatus {
        Pending => "pending",
        Paid => "paid",
        Overdue => "overdue",
        Waived => "waived",
    }
}

closed_set! {
    /// Discriminator for the polymorphic request assignee.
    AssigneeKind {
        User => "User",
        Vendor => "Vendor",
    }
}

closed_set! {
    CommentContext {
        Request => "request",
        ScheduledMaintenance => "scheduledmaintenance",
        Property => "property",
        Unit => "unit",
    }
}

closed_set! {
    NotificationKind {
        RequestCreated => "request_created",
        RequestAssigned => "request_assigned",
        RequestStatusChanged => "request_status_changed",
        RequestCommented => "request_commented",
        FeedbackSubmitted => "feedback_submitted",
        MaintenanceDue => "maintenance_due",
        LeaseCreated => "lease_created",
        LeaseTerminated => "lease_terminated",
        RentReminder => "rent_reminder",
        UnitAssigned => "unit_assigned",
    }
}

impl NotificationKind {
    /// Kinds that additionally go out over SMS when the recipient has a
    /// phone number on file.
    pub fn sms_enabled(&self) -> bool {
        matches!(
            self,
            Self::RequestAssigned
                | Self::RequestStatusChanged
                | Self::MaintenanceDue
                | Self::RentReminder
        )
    }
}

closed_set! {
    AuditAction {
        Create => "create",
        Read => "read",
        Update => "update",
        Delete => "delete",
        Assign => "assign",
        StatusChange => "status_change",
        Feedback => "feedback",
        PublicLinkEnabled => "public_link_enabled",
        PublicLinkDisabled => "public_link_disabled",
        PublicView => "public_view",
        PublicUpdate => "public_update",
        Login => "login",
    }
}

closed_set! {
    ResourceKind {
        User => "user",
        Vendor => "vendor",
        Property => "property",
        Unit => "unit",
        PropertyUser => "property_user",
        Request => "request",
        ScheduledMaintenance => "scheduledmaintenance",
        Comment => "comment",
        Media => "media",
        Notification => "notification",
        Lease => "lease",
        Rent => "rent",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_request_status() {
        for status in RequestStatus::ALL {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(RequestStatus::parse("bogus"), None);
    }

    #[test]
    fn request_transitions_follow_the_state_machine() {
        use RequestStatus::*;
        assert!(New.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Reopened));
        assert!(Reopened.can_transition_to(InProgress));
        assert!(Completed.can_transition_to(Archived));
        assert!(!New.can_transition_to(Completed));
        assert!(!Archived.can_transition_to(InProgress));
        assert!(!Verified.can_transition_to(Completed));
    }

    #[test]
    fn management_roles_are_exactly_three() {
        let managing: Vec<_> = PropertyRole::ALL
            .iter()
            .filter(|role| role.is_management())
            .collect();
        assert_eq!(managing.len(), 3);
    }

    #[test]
    fn serde_uses_the_wire_spelling() {
        let parsed: AssigneeKind = serde_json::from_str("\"Vendor\"").unwrap();
        assert_eq!(parsed, AssigneeKind::Vendor);
        let parsed: FrequencyType = serde_json::from_str("\"bi_weekly\"").unwrap();
        assert_eq!(parsed, FrequencyType::BiWeekly);
    }
}
