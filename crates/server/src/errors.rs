//! Error responses and the error page middleware.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use govform_core::WizardError;
use serde_json::json;
use tracing::{error, warn};

use crate::server::AppState;

/// Which error page a failed response should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPage {
    NotFound,
    SessionEnded,
    CookiesRequired,
    MissingPrerequisite,
    ServerError,
}

impl ErrorPage {
    pub fn template(self) -> &'static str {
        match self {
            Self::NotFound => "errors/page-not-found",
            Self::SessionEnded => "errors/session-ended",
            Self::CookiesRequired => "errors/cookies-required",
            Self::MissingPrerequisite => "errors/missing-prereq",
            Self::ServerError => "errors/error",
        }
    }

    fn fallback_text(self) -> &'static str {
        match self {
            Self::NotFound => "Page not found",
            Self::SessionEnded => "Your session has ended",
            Self::CookiesRequired => "Cookies are required to use this service",
            Self::MissingPrerequisite => "You cannot access this page yet",
            Self::ServerError => "Sorry, there is a problem with the service",
        }
    }
}

/// Handler error. The response carries an [`ErrorPage`] marker that
/// [`error_page_middleware`] turns into HTML.
#[derive(Debug)]
pub struct AppError(pub WizardError);

impl From<WizardError> for AppError {
    fn from(err: WizardError) -> Self {
        Self(err)
    }
}

impl From<govform_session::SessionError> for AppError {
    fn from(err: govform_session::SessionError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let page = match &self.0 {
            WizardError::NotFound(_) => ErrorPage::NotFound,
            WizardError::SessionEnded => ErrorPage::SessionEnded,
            WizardError::CookiesRequired => ErrorPage::CookiesRequired,
            WizardError::MissingPrerequisite(_) => ErrorPage::MissingPrerequisite,
            _ => ErrorPage::ServerError,
        };
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if page == ErrorPage::ServerError {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let mut response = (status, page.fallback_text()).into_response();
        response.extensions_mut().insert(page);
        response
    }
}

/// Fallback for unmatched routes.
pub async fn not_found(req: Request) -> AppError {
    AppError(WizardError::not_found(req.uri().path().to_string()))
}

/// Replaces marked error responses with the rendered error template, keeping
/// the status code. Without a template the plain text body is kept.
pub async fn error_page_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let accept_language = req
        .headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(req).await;
    let Some(page) = response.extensions().get::<ErrorPage>().copied() else {
        return response;
    };

    let template = page.template();
    if !state.renderer.has_template(template) {
        return response;
    }

    let locale = state.translator.negotiate(accept_language.as_deref());
    let context = json!({
        "appName": state.config.app_name,
        "locale": locale,
        "t": state.translator.bundle(&locale),
        "urls": {"public": state.config.urls.public},
        "status": response.status().as_u16(),
    });

    let html = match state.renderer.render(template, &context) {
        Ok(html) => html,
        Err(e) => {
            error!(error = %e, template, "Failed to render error page");
            return response;
        }
    };

    // Keep status and headers such as Set-Cookie, replace the body.
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(html))
}
