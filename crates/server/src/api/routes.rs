use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use super::{execute, executions, handlers, middleware as mw, queues, scripts, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Script execution
        .route("/lua/execute", post(execute::execute_script))
        // Saved scripts
        .route(
            "/scripts",
            get(scripts::list_scripts).post(scripts::create_script),
        )
        .route(
            "/scripts/{id}",
            get(scripts::get_script)
                .put(scripts::update_script)
                .delete(scripts::delete_script),
        )
        .route(
            "/scripts/{id}/executions",
            get(scripts::list_script_executions),
        )
        .route(
            "/scripts/{id}/latest-execution",
            get(scripts::latest_script_execution),
        )
        // Execution history
        .route("/script-executions", get(executions::list_executions))
        .route("/script-executions/{id}", get(executions::get_execution))
        // Queues
        .route("/queues", get(queues::list_queues))
        .route("/jobs/{id}", get(queues::get_job))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::auth_middleware,
        ));

    let media = ServeDir::new(&state.config().media.root);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws/notifications", get(ws::ws_handler))
        .route("/metrics", get(handlers::metrics))
        .nest_service("/media", media)
        .with_state(state)
        .layer(middleware::from_fn(mw::metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
