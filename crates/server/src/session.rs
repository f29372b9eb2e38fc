//! Cookie backed sessions.
//!
//! The middleware resolves the signed session cookie, loads the journey
//! session from the store and exposes it to handlers through the
//! [`Session`] extractor. Changes are written back once the handler has
//! produced its response.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use govform_core::{JourneySession, WizardError};
use govform_session::{CookieSigner, SessionError};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::server::AppState;

#[derive(Debug)]
struct SessionState {
    id: String,
    data: JourneySession,
    original: JourneySession,
    had_cookie: bool,
    expired: bool,
    is_new: bool,
}

/// Handle to the current request's session.
#[derive(Debug, Clone)]
pub struct Session(Arc<Mutex<SessionState>>);

impl Session {
    fn new(id: String, data: JourneySession, had_cookie: bool, expired: bool, is_new: bool) -> Self {
        Self(Arc::new(Mutex::new(SessionState {
            id,
            original: data.clone(),
            data,
            had_cookie,
            expired,
            is_new,
        })))
    }

    pub fn id(&self) -> String {
        self.0.lock().id.clone()
    }

    /// A copy of the session data; write it back with [`Session::replace`].
    pub fn snapshot(&self) -> JourneySession {
        self.0.lock().data.clone()
    }

    pub fn replace(&self, data: JourneySession) {
        self.0.lock().data = data;
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut JourneySession) -> R) -> R {
        f(&mut self.0.lock().data)
    }

    /// Whether the request carried a session cookie at all.
    pub fn had_cookie(&self) -> bool {
        self.0.lock().had_cookie
    }

    /// The request's cookie pointed at a session that no longer exists.
    pub fn expired(&self) -> bool {
        self.0.lock().expired
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| {
            AppError(WizardError::Internal(anyhow::anyhow!(
                "session middleware is not installed"
            )))
        })
    }
}

pub async fn middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie_name = state.config.session.name.as_str();
    let cookie = read_cookie(req.headers(), cookie_name);
    let had_cookie = cookie.is_some();

    let session = match cookie.as_deref().and_then(|v| state.signer.verify(v)) {
        Some(id) => match state.store.load(&id).await {
            Ok(Some(data)) => Session::new(id, data, true, false, false),
            Ok(None) => {
                debug!("Session cookie refers to an expired session");
                Session::new(CookieSigner::new_id(), JourneySession::new(), true, true, true)
            }
            Err(SessionError::Serialization(e)) => {
                metrics::counter!("wizard.session.errors").increment(1);
                warn!(error = %e, "Discarding unreadable session");
                if let Err(e) = state.store.destroy(&id).await {
                    error!(error = %e, "Failed to remove unreadable session");
                    return Err(e.into());
                }
                Session::new(CookieSigner::new_id(), JourneySession::new(), true, true, true)
            }
            Err(e) => {
                metrics::counter!("wizard.session.errors").increment(1);
                return Err(e.into());
            }
        },
        None => Session::new(
            CookieSigner::new_id(),
            JourneySession::new(),
            had_cookie,
            had_cookie,
            true,
        ),
    };

    req.extensions_mut().insert(session.clone());
    let mut response = next.run(req).await;

    let (id, data, changed, is_new) = {
        let guard = session.0.lock();
        (
            guard.id.clone(),
            guard.data.clone(),
            guard.data != guard.original,
            guard.is_new,
        )
    };

    if changed || is_new {
        if let Err(e) = state.store.save(&id, &data).await {
            metrics::counter!("wizard.session.errors").increment(1);
            error!(error = %e, "Failed to save session");
            return Err(e.into());
        }
    }

    if is_new {
        let value = set_cookie(cookie_name, &state.signer.sign(&id), state.config.session.secure);
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => {
                return Err(AppError(WizardError::Internal(anyhow::anyhow!(
                    "session cookie is not a valid header: {e}"
                ))));
            }
        }
    }

    Ok(response.into_response())
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

fn set_cookie(name: &str, value: &str, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
