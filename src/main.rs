//! Kingston 311 query service: binary entrypoint.
//! Boots the Axum server with the answer pipeline, CORS and `/metrics`.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;

use kingston_311_router::{
    api, build_pipeline, config::Settings, metrics::Metrics, telemetry, AppState,
};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let settings = Settings::from_env()
        .context("reading settings")
        .map_err(shuttle_runtime::Error::Custom)?;
    let pipeline = build_pipeline(&settings).map_err(shuttle_runtime::Error::Custom)?;
    let metrics = Metrics::init().map_err(shuttle_runtime::Error::Custom)?;

    let router = api::router(AppState::new(pipeline), &settings.allowed_origins)
        .merge(metrics.router());

    Ok(router.into())
}
