use std::sync::Arc;

use axum::{
    Router,
    routing::{get, delete},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    // Patients browse availability without an account
    let public_routes = Router::new()
        .route("/slots", get(handlers::get_available_slots));

    // Professionals manage their own schedule
    let protected_routes = Router::new()
        .route("/schedules", get(handlers::list_schedules).post(handlers::add_schedule))
        .route("/schedules/{schedule_id}", delete(handlers::remove_schedule))
        .route("/time-blocks", get(handlers::list_time_blocks).post(handlers::add_time_block))
        .route("/time-blocks/{block_id}", delete(handlers::remove_time_block))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
