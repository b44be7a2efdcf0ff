//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, LlmPlannerAdapter},
    config::Config,
    error::ApiError,
    service::PlannerService,
    web::{
        auth::{login_handler, logout_handler, me_handler, signup_handler},
        generate_plan_handler, generate_topics_handler, get_study_plan_handler,
        list_study_plans_handler, refine_plan_handler,
        rest::ApiDoc,
        require_auth,
        state::AppState,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            config.log_level.to_string(),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Generation Adapter ---
    let llm_api_key = config
        .llm_api_key
        .clone()
        .ok_or_else(|| ApiError::Internal("GROQ_API_KEY is required".to_string()))?;
    let llm_config = OpenAIConfig::new()
        .with_api_key(llm_api_key)
        .with_api_base(config.llm_api_base.clone());
    let llm_client = Client::with_config(llm_config);

    let planner_adapter = Arc::new(LlmPlannerAdapter::new(
        llm_client,
        config.planner_model.clone(),
        config.llm_timeout,
    ));

    // --- 4. Build the Orchestration Service and Shared AppState ---
    let planner = Arc::new(PlannerService::new(
        planner_adapter,
        db_adapter.clone(),
        db_adapter.clone(),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        auth: db_adapter.clone(),
        plans: db_adapter.clone(),
        usage: db_adapter,
        planner: planner.clone(),
    });

    // --- 5. Configure CORS for the Browser Client ---
    let cors_origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/me", get(me_handler))
        .route("/ai/generate-topics", post(generate_topics_handler))
        .route("/ai/generate-plan", post(generate_plan_handler))
        .route("/ai/refine-plan", post(refine_plan_handler))
        .route("/study-plans", get(list_study_plans_handler))
        .route("/study-plans/{id}", get(get_study_plan_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete
    // application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush detached audit writes before the process exits.
    info!("Draining in-flight audit writes...");
    planner.drain().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}
