use axum::extract::DefaultBodyLimit;
use axum::Router;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};

use crate::routes::{admin, etf, health, jobs, portfolios, uploads};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    let max_upload = state.config.max_upload_bytes;

    Router::<AppState>::new()
        .merge(health::router())
        .merge(portfolios::router())
        .merge(uploads::router())
        .merge(jobs::router())
        .merge(etf::router())
        .merge(admin::router())
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(state)
        .layer(cors)
}
