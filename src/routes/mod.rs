use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod customers;
pub mod expenses;
pub mod functions;
pub mod health;
pub mod notifications;
pub mod receipts;
pub mod settings;
pub mod upload;
pub mod users;
pub mod vendors;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => AllowOrigin::list(origins.split(',').filter_map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed
                .parse::<HeaderValue>()
                .map_err(|err| {
                    warn!(origin = %trimmed, error = %err, "ignoring invalid CORS origin")
                })
                .ok()
        })),
        None => AllowOrigin::mirror_request(),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/accept-invitation", post(auth::accept_invitation))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let expense_routes = Router::new()
        .route(
            "/",
            get(expenses::list_expenses).post(expenses::create_expense),
        )
        .route("/bulk/status", post(expenses::bulk_update_status))
        .route("/assignments", post(expenses::create_assignment))
        .route(
            "/:id",
            get(expenses::get_expense)
                .patch(expenses::update_expense)
                .delete(expenses::delete_expense),
        )
        .route("/:id/status", post(expenses::update_status))
        .route(
            "/:id/receipts",
            get(receipts::list_receipts).post(receipts::upload_receipt),
        );

    let receipt_routes = Router::new()
        .route("/:id/url", get(receipts::receipt_url))
        .route("/:id/analyze", post(receipts::request_analysis));

    let vendor_routes = Router::new()
        .route("/", get(vendors::list_vendors).post(vendors::create_vendor))
        .route(
            "/:id",
            patch(vendors::update_vendor).delete(vendors::delete_vendor),
        );

    let customer_routes = Router::new()
        .route(
            "/",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route(
            "/:id",
            patch(customers::update_customer).delete(customers::delete_customer),
        );

    let notification_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/:id/read", post(notifications::mark_read));

    let user_routes = Router::new()
        .route("/", get(users::list_profiles))
        .route("/me/avatar", post(users::upload_avatar))
        .route("/:id/role", patch(users::update_role));

    let settings_routes = Router::new()
        .route("/modules", get(settings::list_modules))
        .route("/modules/:key", put(settings::upsert_module))
        .route(
            "/categories",
            get(settings::list_categories).post(settings::create_category),
        )
        .route(
            "/gl-accounts",
            get(settings::list_gl_accounts).post(settings::create_gl_account),
        );

    let function_routes = Router::new()
        .route("/smart-add-analysis", post(functions::smart_add_analysis))
        .route("/analyze-vendor-invoice", post(functions::analyze_vendor_invoice))
        .route(
            "/analyze-customer-contact",
            post(functions::analyze_customer_contact),
        )
        .route("/invite-user", post(users::invite_user));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/expenses", expense_routes)
        .nest("/api/receipts", receipt_routes)
        .nest("/api/vendors", vendor_routes)
        .nest("/api/customers", customer_routes)
        .nest("/api/notifications", notification_routes)
        .nest("/api/users", user_routes)
        .nest("/api/settings", settings_routes)
        .nest("/api/functions", function_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(upload::MAX_UPLOAD_BYTES + 1024 * 1024))
}
