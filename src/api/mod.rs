mod handlers;
pub mod middleware;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::db::Database;
use middleware::{auth_middleware, rate_limit_middleware, SecurityConfig};

/// Router without authentication, for local use and tests.
pub fn create_router(db: Database) -> Router {
    create_router_with_security(db, SecurityConfig::disabled())
}

pub fn create_router_with_security(db: Database, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Features
        .route("/features", get(handlers::list_features).post(handlers::create_feature))
        .route("/features/{id}", get(handlers::get_feature))
        .route("/features/{id}/history", get(handlers::get_feature_history))
        .route(
            "/features/{id}/transitions",
            get(handlers::list_transitions).post(handlers::transition),
        )
        .route("/features/{id}/complete", post(handlers::complete_feature))
        .route("/features/{id}/escalate", post(handlers::escalate_feature))
        .route("/features/{id}/resume", post(handlers::resume_feature))
        .route("/features/{id}/cancel", post(handlers::cancel_feature))
        .route("/features/{id}/vcs", put(handlers::update_vcs))
        .route("/features/{id}/pull-request", post(handlers::record_pull_request))
        .route("/features/{id}/merge", post(handlers::record_merge))
        // Gates and blockers
        .route(
            "/features/{id}/gates",
            get(handlers::list_gates).post(handlers::record_gate),
        )
        .route("/features/{id}/gates/latest", get(handlers::latest_gates))
        .route(
            "/features/{id}/blockers",
            get(handlers::list_blockers).post(handlers::open_blocker),
        )
        .route("/blockers/{id}", get(handlers::get_blocker))
        .route("/blockers/{id}/start", post(handlers::start_blocker))
        .route("/blockers/{id}/resolve", post(handlers::resolve_blocker))
        .route("/blockers/{id}/escalate", post(handlers::escalate_blocker))
        // Telemetry
        .route(
            "/features/{id}/invocations",
            get(handlers::list_invocations).post(handlers::start_invocation),
        )
        .route(
            "/features/{id}/invocations/backfill",
            post(handlers::backfill_invocation),
        )
        .route("/features/{id}/coverage", get(handlers::check_coverage))
        .route("/invocations/{id}", get(handlers::get_invocation))
        .route("/invocations/{id}/end", post(handlers::end_invocation))
        // Task lists
        .route(
            "/features/{id}/tasks/{phase}",
            get(handlers::get_task_list).put(handlers::submit_task_list),
        )
        // Learnings
        .route("/learnings", get(handlers::list_learnings).post(handlers::create_learning))
        .route("/learnings/ready", get(handlers::ready_learnings))
        .route("/learnings/{id}", get(handlers::get_learning))
        .route("/learnings/{id}/evolve", post(handlers::evolve_learning))
        .route("/learnings/{id}/validate", post(handlers::validate_learning))
        .route("/learnings/{id}/reference", post(handlers::reference_learning))
        .route("/learnings/{id}/chain", get(handlers::evolution_chain))
        .route("/learnings/{id}/conflicts", get(handlers::conflicts_for))
        .route("/learnings/{id}/scan", post(handlers::scan_conflicts))
        .route(
            "/learnings/{id}/targets",
            get(handlers::list_targets).post(handlers::compute_targets),
        )
        .route("/learnings/{id}/propagations", get(handlers::list_propagations))
        .route("/learnings/{id}/propagation", get(handlers::propagation_status))
        // Conflicts
        .route("/conflicts", get(handlers::list_conflicts).post(handlers::detect_conflict))
        .route("/conflicts/{id}", get(handlers::get_conflict))
        .route("/conflicts/{id}/investigate", post(handlers::investigate_conflict))
        .route("/conflicts/{id}/resolve", post(handlers::resolve_conflict))
        .route("/conflicts/{id}/defer", post(handlers::defer_conflict))
        // Propagation
        .route(
            "/destinations",
            get(handlers::list_destinations).post(handlers::register_destination),
        )
        .route("/propagations", post(handlers::record_propagation))
        .route("/propagation/queue", get(handlers::ready_queue))
        .route("/propagation/overview", get(handlers::propagation_overview))
        // Health and evals
        .route(
            "/features/{id}/evals",
            get(handlers::feature_evals).post(handlers::evaluate_feature),
        )
        .route(
            "/system/evals",
            get(handlers::system_evals).post(handlers::evaluate_system),
        )
        .route("/alerts", get(handlers::active_alerts))
        .route("/alerts/{id}/acknowledge", post(handlers::acknowledge_alert))
        .route("/alerts/{id}/resolve", post(handlers::resolve_alert))
        .route("/health", get(handlers::health));

    let mut router = Router::new()
        .nest("/api/v1", api)
        .with_state(db)
        .layer(from_fn_with_state(security.clone(), auth_middleware));

    if let Some(limiter) = security.rate_limiter.clone() {
        router = router.layer(from_fn_with_state(limiter, rate_limit_middleware));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(security.cors_layer())
}
