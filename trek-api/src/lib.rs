use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod availability;
pub mod bookings;
pub mod checkout;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::{AppState, AuthConfig, Backends};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let checkout = checkout::routes()
        .route_layer(from_fn_with_state(state.clone(), middleware::optional_auth_middleware));
    let protected = bookings::routes()
        .merge(admin::routes())
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth_middleware));

    let router = Router::new()
        .merge(checkout)
        .merge(protected)
        .merge(checkout::session_routes())
        .merge(webhooks::routes())
        .merge(availability::routes())
        .merge(metrics::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Needs ConnectInfo, so only wired when served with a socket address.
    let router = if state.redis.is_some() {
        router.layer(from_fn_with_state(state.clone(), rate_limit_middleware))
    } else {
        router
    };

    router.with_state(state)
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(req).await);
    };
    let key = format!("ratelimit:{}", addr.ip());

    match redis.check_rate_limit(&key, 100, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")),
        Err(e) => {
            tracing::warn!("Rate limiter unavailable, allowing request: {}", e);
            Ok(next.run(req).await)
        }
    }
}
