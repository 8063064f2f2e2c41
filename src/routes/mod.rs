use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod comments;
pub mod health;
pub mod leases;
pub mod notifications;
pub mod properties;
pub mod public;
pub mod requests;
pub mod scheduled;
pub mod units;
pub mod users;
pub mod vendors;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let requests_routes = Router::new()
        .route(
            "/",
            get(requests::list_requests).post(requests::create_request),
        )
        .route(
            "/:id",
            get(requests::get_request)
                .patch(requests::update_request)
                .delete(requests::delete_request),
        )
        .route("/:id/assign", post(requests::assign_request))
        .route("/:id/status", post(requests::update_status))
        .route("/:id/verify", post(requests::verify_request))
        .route("/:id/reopen", post(requests::reopen_request))
        .route("/:id/archive", post(requests::archive_request))
        .route("/:id/feedback", post(requests::submit_feedback))
        .route("/:id/media", post(requests::upload_request_media))
        .route(
            "/:id/media/:media_id",
            delete(requests::delete_request_media),
        )
        .route(
            "/:id/public-link",
            post(requests::enable_public_link).delete(requests::disable_public_link),
        );

    let scheduled_routes = Router::new()
        .route(
            "/",
            get(scheduled::list_scheduled).post(scheduled::create_scheduled),
        )
        .route(
            "/:id",
            get(scheduled::get_scheduled)
                .patch(scheduled::update_scheduled)
                .delete(scheduled::delete_scheduled),
        )
        .route("/:id/status", post(scheduled::update_scheduled_status))
        .route(
            "/:id/public-link",
            post(scheduled::enable_public_link).delete(scheduled::disable_public_link),
        );

    let properties_routes = Router::new()
        .route(
            "/",
            get(properties::list_properties).post(properties::create_property),
        )
        .route(
            "/:id",
            get(properties::get_property)
                .patch(properties::update_property)
                .delete(properties::delete_property),
        )
        .route(
            "/:id/users",
            get(properties::list_property_users).post(properties::add_property_user),
        )
        .route(
            "/:id/users/:association_id",
            patch(properties::update_property_user).delete(properties::remove_property_user),
        );

    let units_routes = Router::new()
        .route("/", get(units::list_units).post(units::create_unit))
        .route(
            "/:id",
            get(units::get_unit)
                .patch(units::update_unit)
                .delete(units::delete_unit),
        )
        .route("/:id/tenants", post(units::assign_tenant))
        .route("/:id/tenants/:tenant_id", delete(units::remove_tenant));

    let leases_routes = Router::new()
        .route("/", get(leases::list_leases).post(leases::create_lease))
        .route(
            "/:id",
            get(leases::get_lease)
                .patch(leases::update_lease)
                .delete(leases::delete_lease),
        )
        .route("/:id/terminate", post(leases::terminate_lease))
        .route(
            "/:id/amendments",
            get(leases::list_amendments).post(leases::amend_lease),
        );

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::deactivate_user),
        )
        .route("/:id/preferences", patch(users::update_preferences));

    let vendors_routes = Router::new()
        .route("/", get(vendors::list_vendors).post(vendors::create_vendor))
        .route(
            "/:id",
            get(vendors::get_vendor)
                .patch(vendors::update_vendor)
                .delete(vendors::deactivate_vendor),
        );

    let comments_routes = Router::new()
        .route(
            "/",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route("/:id", delete(comments::delete_comment));

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/read-all", post(notifications::mark_all_read))
        .route(
            "/:id",
            delete(notifications::delete_notification),
        )
        .route("/:id/read", post(notifications::mark_read));

    // Public-link traffic is unauthenticated on purpose; token checks live
    // in the handlers.
    let public_routes = Router::new()
        .route(
            "/requests/public/:token",
            get(public::get_public_request).post(public::public_request_update),
        )
        .route(
            "/scheduled/public/:token",
            get(public::get_public_schedule).post(public::public_schedule_comment),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/requests", requests_routes)
        .nest("/api/scheduled", scheduled_routes)
        .nest("/api/properties", properties_routes)
        .nest("/api/units", units_routes)
        .nest("/api/leases", leases_routes)
        .nest("/api/users", users_routes)
        .nest("/api/vendors", vendors_routes)
        .nest("/api/comments", comments_routes)
        .nest("/api/notifications", notifications_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
