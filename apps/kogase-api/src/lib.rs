use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use http::{HeaderName, HeaderValue, Method, header};
use kogase_core::{
    AnalyticsRepository, AuthTokenRepository, Cache, DeviceRepository, EventRepository,
    GeoLocator, ProjectRepository, SessionRepository, UserRepository,
    domain::auth_token::TokenIssuer,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub mod application;
pub mod config;

use application::{
    analytics::{handle_active_users, handle_aggregate, handle_retention},
    commands::{
        create_project::handle_create_project_request,
        login::{handle_login_request, handle_logout_request, handle_me_request},
        manage_project::{
            handle_delete_project_request, handle_regenerate_api_key_request,
            handle_update_project_request,
        },
        record_event::{handle_record_event_batch_request, handle_record_event_request},
        register_device::{handle_delete_device_request, handle_register_device_request},
        register_user::handle_register_user_request,
        session::{handle_begin_session_request, handle_end_session_request},
        update_user::{handle_delete_user_request, handle_update_user_request},
    },
    middleware::{
        API_KEY_HEADER, bearer_auth, project_key_auth, project_key_or_bearer_auth,
        request_deadline,
    },
    query::{
        handle_get_device, handle_get_event, handle_get_project, handle_get_project_by_key,
        handle_get_session, handle_get_user, handle_health, handle_health_api_key,
        handle_list_devices, handle_list_events, handle_list_projects, handle_list_sessions,
        handle_list_users,
    },
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Holds shared dependencies
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub projects: Arc<dyn ProjectRepository>,
    pub tokens: Arc<dyn AuthTokenRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub events: Arc<dyn EventRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub geo: Arc<dyn GeoLocator>,
    pub cache: Arc<dyn Cache>,
    pub token_issuer: Arc<TokenIssuer>,
    pub request_timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Wires every repository port to one store.
    pub fn with_store<S>(
        store: Arc<S>,
        geo: Arc<dyn GeoLocator>,
        cache: Arc<dyn Cache>,
        token_issuer: Arc<TokenIssuer>,
    ) -> Self
    where
        S: UserRepository
            + ProjectRepository
            + AuthTokenRepository
            + DeviceRepository
            + SessionRepository
            + EventRepository
            + AnalyticsRepository
            + 'static,
    {
        Self {
            users: store.clone(),
            projects: store.clone(),
            tokens: store.clone(),
            devices: store.clone(),
            sessions: store.clone(),
            events: store.clone(),
            analytics: store,
            geo,
            cache,
            token_issuer,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cors_origins: vec!["*".to_string()],
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| warn!("Ignoring invalid CORS origin '{}'", origin))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
        ])
}

// Function to create the main Axum router with state
pub fn create_app(app_state: AppState) -> Router {
    let bearer = || middleware::from_fn_with_state(app_state.clone(), bearer_auth);
    let project_key = || middleware::from_fn_with_state(app_state.clone(), project_key_auth);
    let either = || middleware::from_fn_with_state(app_state.clone(), project_key_or_bearer_auth);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/health/apikey", get(handle_health_api_key).route_layer(project_key()))
        // Auth
        .route("/auth/login", post(handle_login_request))
        .route("/auth/logout", post(handle_logout_request).route_layer(bearer()))
        .route("/auth/me", get(handle_me_request).route_layer(bearer()))
        // Users: registration is open, everything else needs a bearer token
        .route(
            "/users",
            post(handle_register_user_request).merge(get(handle_list_users).route_layer(bearer())),
        )
        .route(
            "/users/{user_id}",
            get(handle_get_user)
                .patch(handle_update_user_request)
                .delete(handle_delete_user_request)
                .route_layer(bearer()),
        )
        // Projects
        .route(
            "/projects",
            post(handle_create_project_request)
                .get(handle_list_projects)
                .route_layer(bearer()),
        )
        .route(
            "/projects/apikey",
            get(handle_get_project_by_key).route_layer(project_key()),
        )
        .route(
            "/projects/{project_id}",
            get(handle_get_project)
                .patch(handle_update_project_request)
                .delete(handle_delete_project_request)
                .route_layer(bearer()),
        )
        .route(
            "/projects/{project_id}/apikey",
            post(handle_regenerate_api_key_request).route_layer(bearer()),
        )
        // Devices
        .route(
            "/devices",
            post(handle_register_device_request)
                .route_layer(project_key())
                .merge(get(handle_list_devices).route_layer(bearer())),
        )
        .route(
            "/devices/{device_id}",
            get(handle_get_device)
                .route_layer(either())
                .merge(delete(handle_delete_device_request).route_layer(bearer())),
        )
        // Sessions
        .route(
            "/sessions/begin",
            post(handle_begin_session_request).route_layer(project_key()),
        )
        .route(
            "/sessions/end",
            post(handle_end_session_request).route_layer(project_key()),
        )
        .route("/sessions", get(handle_list_sessions).route_layer(bearer()))
        .route("/sessions/{session_id}", get(handle_get_session).route_layer(bearer()))
        // Events
        .route(
            "/events",
            post(handle_record_event_request)
                .route_layer(project_key())
                .merge(get(handle_list_events).route_layer(bearer())),
        )
        .route(
            "/events/batch",
            post(handle_record_event_batch_request).route_layer(project_key()),
        )
        .route("/events/{event_id}", get(handle_get_event).route_layer(bearer()))
        // Analytics
        .route("/analytics", get(handle_aggregate).route_layer(bearer()))
        .route("/analytics/retention", get(handle_retention).route_layer(bearer()))
        .route("/analytics/active-users", get(handle_active_users).route_layer(bearer()));

    let cors = cors_layer(&app_state.cors_origins);
    let deadline = middleware::from_fn_with_state(app_state.request_timeout, request_deadline);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(deadline)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

