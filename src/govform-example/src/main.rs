//! govform example service: an eligibility checker followed by a short
//! application form.

mod controllers;
mod routes;
mod submission;

use std::path::PathBuf;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Extension;
use clap::Parser;
use govform_core::config::ConfigLoader;
use govform_server::{setup, start_metrics, telemetry, AppError, AppState, Flags, SetupOptions};
use serde_json::json;
use tracing::{error, info};

/// Business flag that closes the service to new applicants.
const APPLICATIONS_CLOSED: &str = "applications_closed";

#[derive(Parser, Debug)]
#[command(name = "govform-example")]
#[command(about = "Example eligibility and application journeys")]
#[command(version)]
struct Cli {
    /// Extra config file, applied over config/default.yaml (repeatable)
    #[arg(short = 'c', long = "config")]
    config: Vec<PathBuf>,

    /// Directory holding config/, views/, locales/ and public/
    #[arg(long, env = "GOVFORM_APP_ROOT")]
    app_root: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_root = cli
        .app_root
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
    let mut loader = ConfigLoader::new(&app_root);
    for file in cli.config {
        loader = loader.with_file(file);
    }
    let mut config = loader.load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    telemetry::init(&config.logs);
    info!(
        app = %config.app_name,
        env = %config.env,
        port = config.port,
        root = %app_root.display(),
        "Configuration loaded"
    );

    if let Err(e) = start_metrics(&config.host, &config.metrics) {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let eligibility = routes::eligibility::wizard(&config)?;
    let apply = routes::apply::wizard(&config)?;

    let app = setup(config, SetupOptions::default())
        .await?
        .route("/", get(home))
        .wizard(eligibility)
        .wizard(apply);

    app.listen().await
}

/// Start page: sends users into the eligibility journey unless the service
/// is closed.
async fn home(
    State(state): State<AppState>,
    flags: Option<Extension<Flags>>,
) -> Result<Response, AppError> {
    let flags = flags.map(|Extension(f)| f).unwrap_or_default();
    if flags.is_disabled(APPLICATIONS_CLOSED) {
        return Ok(Redirect::to("/eligibility").into_response());
    }

    let locale = state.translator.default_locale().to_string();
    let context = json!({
        "appName": state.config.app_name,
        "locale": locale,
        "t": state.translator.bundle(&locale),
        "urls": {"public": state.config.urls.public},
    });
    let html = state.renderer.render("pages/closed", &context)?;
    Ok(Html(html).into_response())
}
