//! Application bootstrap: builds the router around mounted wizards and
//! starts the HTTP listener.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, MethodRouter};
use axum::Router;
use govform_core::config::MetricsConfig;
use govform_core::{AppConfig, WizardResult};
use govform_session::{CookieSigner, SessionStore};
use govform_wizard::Wizard;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::{self, error_page_middleware};
use crate::i18n::Translator;
use crate::render::{HandlebarsRenderer, Renderer};
use crate::{flags, headers, health, routes, session};

/// Shared state for every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SessionStore>,
    pub signer: CookieSigner,
    pub renderer: Arc<dyn Renderer>,
    pub translator: Arc<Translator>,
    pub start_time: Instant,
}

/// Installs application middleware on the router before the built-in
/// static, session and error handling.
pub type MiddlewareSetup = Box<dyn FnOnce(Router<AppState>) -> Router<AppState> + Send>;

/// Overrides and switches for [`setup`]. Anything left `None` is built
/// from the configuration.
#[derive(Default)]
pub struct SetupOptions {
    pub store: Option<Arc<dyn SessionStore>>,
    pub renderer: Option<Arc<dyn Renderer>>,
    pub translator: Option<Arc<Translator>>,
    pub middleware_setup: Option<MiddlewareSetup>,
    pub disable_static: bool,
    pub disable_session: bool,
    pub disable_error_pages: bool,
}

impl SetupOptions {
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_translator(mut self, translator: Arc<Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_middleware<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(Router<AppState>) -> Router<AppState> + Send + 'static,
    {
        self.middleware_setup = Some(Box::new(setup));
        self
    }
}

/// Connects the session store, loads views and locales, and returns an
/// [`App`] ready for wizards and routes to be mounted.
pub async fn setup(config: AppConfig, options: SetupOptions) -> WizardResult<App> {
    let store = match options.store.clone() {
        Some(store) => store,
        None => govform_session::connect(&config).await?,
    };

    let renderer: Arc<dyn Renderer> = match options.renderer.clone() {
        Some(renderer) => renderer,
        None => {
            let dirs: Vec<PathBuf> = config.views.iter().map(|v| config.resolve_path(v)).collect();
            Arc::new(HandlebarsRenderer::load(&dirs)?)
        }
    };

    let translator = match options.translator.clone() {
        Some(translator) => translator,
        None => {
            let dirs: Vec<PathBuf> = config
                .locales
                .dirs
                .iter()
                .map(|d| config.resolve_path(d))
                .collect();
            Arc::new(Translator::load(&dirs, &config.locales.default)?)
        }
    };

    if config.is_production() && config.session.secret == "changeme" {
        warn!("Session secret is the default value");
    }

    let state = AppState {
        signer: CookieSigner::new(&config.session.secret),
        config: Arc::new(config),
        store,
        renderer,
        translator,
        start_time: Instant::now(),
    };

    info!(app = %state.config.app_name, env = %state.config.env, "Application configured");

    Ok(App {
        state,
        options,
        router: Router::new(),
        wizards: Vec::new(),
    })
}

pub struct App {
    state: AppState,
    options: SetupOptions,
    router: Router<AppState>,
    wizards: Vec<String>,
}

impl App {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.state.config
    }

    /// Mounts every step of `wizard` (and its edit routes) on the main router.
    pub fn wizard(mut self, wizard: Wizard) -> Self {
        info!(
            wizard = %wizard.name(),
            base = %wizard.options().base_path,
            steps = wizard.steps().len(),
            "Mounting wizard"
        );
        self.wizards.push(wizard.name().to_string());
        self.router = self.router.merge(routes::wizard_router(Arc::new(wizard)));
        self
    }

    /// Adds an application route behind the session and flag middleware.
    pub fn route(mut self, path: &str, method_router: MethodRouter<AppState>) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    pub fn merge(mut self, router: Router<AppState>) -> Self {
        self.router = self.router.merge(router);
        self
    }

    pub fn into_router(self) -> Router {
        let App {
            state,
            options,
            router: main,
            ..
        } = self;
        let config = state.config.clone();

        let mut main = main.layer(from_fn_with_state(state.clone(), flags::middleware));
        if !options.disable_session {
            main = main.layer(from_fn_with_state(state.clone(), session::middleware));
        }

        let mut router: Router<AppState> = Router::new();
        if let Some(path) = config.urls.version_path() {
            router = router.route(path, get(health::version));
        }
        if let Some(path) = config.urls.healthcheck_path() {
            router = router.route(path, get(health::healthcheck));
        }
        if !options.disable_static {
            if let Some(assets) = static_router(&config) {
                router = router.nest_service(&config.urls.public, assets);
            }
        }

        let mut router = router.merge(main).fallback(errors::not_found);
        if let Some(setup) = options.middleware_setup {
            router = setup(router);
        }
        let mut router = router.with_state(state.clone());

        if !options.disable_error_pages {
            router = router.layer(from_fn_with_state(state.clone(), error_page_middleware));
        }
        router = router.layer(from_fn_with_state(state, headers::middleware));
        if !config.disable_compression {
            router = router.layer(CompressionLayer::new());
        }
        if config.request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }

    /// Binds `host:port` and serves until the process is stopped.
    pub async fn listen(self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.state.config.host.parse()?, self.state.config.port);
        let wizards = self.wizards.clone();
        let app = self.into_router();

        info!(addr = %addr, ?wizards, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Serves the public directories in order; a file missing from every one
/// falls through to the not found page.
fn static_router(config: &AppConfig) -> Option<Router> {
    let public = config.urls.public.as_str();
    if config.public_dirs.is_empty() || public == "/" || !public.starts_with('/') {
        return None;
    }
    let mut assets = Router::new().fallback(errors::not_found);
    for dir in config.public_dirs.iter().rev() {
        let service = ServeDir::new(config.resolve_path(dir)).fallback(assets);
        assets = Router::new().fallback_service(service);
    }
    Some(assets)
}

/// Starts the Prometheus exporter on its own port.
pub fn start_metrics(host: &str, config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(host.parse()?, config.port))
        .install()?;

    info!(port = config.port, "Metrics exporter started");
    Ok(())
}
