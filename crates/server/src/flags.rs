//! Business and feature flags.
//!
//! Configured flags are merged with the per-session overrides on every
//! request and made available to handlers and templates as [`Flags`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use govform_core::{AppConfig, JourneySession};
use serde::Serialize;
use tower::ServiceExt;

use crate::server::AppState;
use crate::session::Session;

pub type FlagFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub business_flags: BTreeMap<String, bool>,
    pub feature_flags: BTreeMap<String, bool>,
}

impl Flags {
    pub fn resolve(config: &AppConfig, session: Option<&JourneySession>) -> Self {
        let mut flags = Self {
            business_flags: config.business_flags.clone(),
            feature_flags: config.feature_flags.clone(),
        };
        if let Some(session) = session {
            flags.business_flags.extend(session.business_flags.clone());
            flags.feature_flags.extend(session.feature_flags.clone());
        }
        flags
    }

    /// Only an explicit `true` enables a business flag.
    pub fn is_enabled(&self, flag: &str) -> bool {
        self.business_flags.get(flag) == Some(&true)
    }

    pub fn is_disabled(&self, flag: &str) -> bool {
        !self.is_enabled(flag)
    }

    pub fn feature_enabled(&self, flag: &str) -> bool {
        self.feature_flags.get(flag) == Some(&true)
    }

    pub fn of(req: &Request) -> Flags {
        req.extensions().get::<Flags>().cloned().unwrap_or_default()
    }
}

pub async fn middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = req.extensions().get::<Session>().map(Session::snapshot);
    let flags = Flags::resolve(&state.config, session.as_ref());
    req.extensions_mut().insert(flags);
    next.run(req).await
}

/// Middleware redirecting to `url` while `flag` is enabled.
/// Use with [`axum::middleware::from_fn`].
pub fn redirect_if_enabled(
    flag: &str,
    url: &str,
) -> impl Fn(Request, Next) -> FlagFuture + Clone + Send + Sync + 'static {
    redirect_when(flag, url, true)
}

/// Middleware redirecting to `url` while `flag` is disabled.
pub fn redirect_if_disabled(
    flag: &str,
    url: &str,
) -> impl Fn(Request, Next) -> FlagFuture + Clone + Send + Sync + 'static {
    redirect_when(flag, url, false)
}

fn redirect_when(
    flag: &str,
    url: &str,
    enabled: bool,
) -> impl Fn(Request, Next) -> FlagFuture + Clone + Send + Sync + 'static {
    let flag = flag.to_string();
    let url = url.to_string();
    move |req: Request, next: Next| -> FlagFuture {
        let flag = flag.clone();
        let url = url.clone();
        Box::pin(async move {
            if Flags::of(&req).is_enabled(&flag) == enabled {
                Redirect::to(&url).into_response()
            } else {
                next.run(req).await
            }
        })
    }
}

/// Handler dispatching to `when_enabled` or `when_disabled` depending on
/// `flag`.
pub fn route_if(
    flag: &str,
    when_enabled: Router,
    when_disabled: Router,
) -> impl Fn(Request) -> FlagFuture + Clone + Send + Sync + 'static {
    let flag = flag.to_string();
    move |req: Request| -> FlagFuture {
        let target = if Flags::of(&req).is_enabled(&flag) {
            when_enabled.clone()
        } else {
            when_disabled.clone()
        };
        Box::pin(async move {
            match target.oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        })
    }
}
