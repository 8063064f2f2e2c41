use uuid::Uuid;

use crate::enums::ResourceKind;
use crate::error::AppResult;
use crate::media::{store_upload, MediaUpload};
use crate::models::{Lease, Media, Property, Unit, User};
use crate::state::AppState;

/// Render the lease summary document and attach it to the lease as a media
/// row. The rendered HTML is intentionally plain; styling is the frontend's
/// problem.
pub async fn generate_lease_document(
    state: &AppState,
    lease: &Lease,
    property: &Property,
    unit: &Unit,
    tenant: &User,
    landlord: &User,
    generated_by: Option<Uuid>,
) -> AppResult<Media> {
    let html = render_lease_html(lease, property, unit, tenant, landlord);

    let upload = MediaUpload {
        bytes: html.into_bytes(),
        file_name: format!("lease-{}-v{}.html", lease.id, lease.version),
        mime_type: "text/html".to_string(),
        is_public: false,
        tags: vec!["lease-document".to_string()],
    };

    store_upload(state, upload, ResourceKind::Lease, lease.id, generated_by).await
}

fn render_lease_html(
    lease: &Lease,
    property: &Property,
    unit: &Unit,
    tenant: &User,
    landlord: &User,
) -> String {
    let rent = format!(
        "{}.{:02} {}",
        lease.monthly_rent_cents / 100,
        lease.monthly_rent_cents % 100,
        lease.currency
    );
    let deposit = format!(
        "{}.{:02} {}",
        lease.deposit_cents / 100,
        lease.deposit_cents % 100,
        lease.currency
    );

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Lease Agreement</title></head>
<body>
<h1>Lease Agreement</h1>
<p>Property: {property_name}, {street}, {city}, {state} {zip}, {country}</p>
<p>Unit: {unit_name}</p>
<p>Tenant: {tenant_name} ({tenant_email})</p>
<p>Landlord: {landlord_name} ({landlord_email})</p>
<p>Term: {start} through {end}</p>
<p>Monthly rent: {rent}, due on day {due_day} of each month</p>
<p>Security deposit: {deposit}</p>
<p>Version: {version}</p>
</body>
</html>
"#,
        property_name = property.name,
        street = property.street,
        city = property.city,
        state = property.state,
        zip = property.zip_code,
        country = property.country,
        unit_name = unit.name,
        tenant_name = tenant.display_name(),
        tenant_email = tenant.email,
        landlord_name = landlord.display_name(),
        landlord_email = landlord.email,
        start = lease.start_date.date(),
        end = lease.end_date.date(),
        rent = rent,
        due_day = lease.payment_due_day,
        deposit = deposit,
        version = lease.version,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> (Lease, Property, Unit, User, User) {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let property = Property {
            id: Uuid::new_v4(),
            name: "Oakwood".into(),
            street: "12 Oak St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip_code: "62704".into(),
            country: "USA".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let unit = Unit {
            id: Uuid::new_v4(),
            property_id: property.id,
            name: "3B".into(),
            floor: Some(3),
            bedrooms: 2,
            bathrooms: 1,
            rent_amount_cents: 120000,
            status: "occupied".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let tenant = User {
            id: Uuid::new_v4(),
            first_name: "Tess".into(),
            last_name: "Tenant".into(),
            email: "tess@example.com".into(),
            phone: None,
            password_hash: "x".into(),
            role: "tenant".into(),
            registration_status: "active".into(),
            notification_preferences: serde_json::json!({}),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let landlord = User {
            first_name: "Len".into(),
            last_name: "Landlord".into(),
            email: "len@example.com".into(),
            id: Uuid::new_v4(),
            ..tenant.clone()
        };
        let lease = Lease {
            id: Uuid::new_v4(),
            property_id: property.id,
            unit_id: unit.id,
            tenant_id: tenant.id,
            landlord_id: landlord.id,
            start_date: now,
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            monthly_rent_cents: 120050,
            currency: "USD".into(),
            payment_due_day: 1,
            deposit_cents: 240000,
            status: "active".into(),
            version: 1,
            renewal_notice_sent: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        (lease, property, unit, tenant, landlord)
    }

    #[test]
    fn renders_parties_and_amounts() {
        let (lease, property, unit, tenant, landlord) = sample();
        let html = render_lease_html(&lease, &property, &unit, &tenant, &landlord);
        assert!(html.contains("Tess Tenant"));
        assert!(html.contains("Len Landlord"));
        assert!(html.contains("1200.50 USD"));
        assert!(html.contains("2400.00 USD"));
        assert!(html.contains("Oakwood"));
    }
}
