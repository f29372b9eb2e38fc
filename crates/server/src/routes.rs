//! Mounts wizard steps as HTTP routes and renders their views.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::header::{self, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, MethodRouter};
use axum::{Extension, Router};
use govform_core::{JourneySession, WizardError, WizardResult};
use govform_wizard::{FieldError, FieldView, FormData, StepOutcome, StepView, Wizard};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::errors::AppError;
use crate::flags::Flags;
use crate::i18n::Translator;
use crate::server::AppState;
use crate::session::Session;

struct StepRoute {
    wizard: Arc<Wizard>,
    key: String,
    edit: bool,
}

/// GET and POST routes for every step of `wizard`, plus `{step}/edit` for
/// editable steps.
pub fn wizard_router(wizard: Arc<Wizard>) -> Router<AppState> {
    let mut router = Router::new();
    for (url, key, editable) in wizard.routes() {
        router = router.route(&url, step_route(&wizard, &key, false));
        if editable {
            router = router.route(&wizard.edit_url(&key), step_route(&wizard, &key, true));
        }
    }
    router
}

fn step_route(wizard: &Arc<Wizard>, key: &str, edit: bool) -> MethodRouter<AppState> {
    let route = Arc::new(StepRoute {
        wizard: wizard.clone(),
        key: key.to_string(),
        edit,
    });
    let on_get = route.clone();
    let on_post = route;

    get(
        move |State(state): State<AppState>,
              session: Session,
              flags: Option<Extension<Flags>>,
              headers: HeaderMap| {
            let route = on_get.clone();
            async move { show_step(&state, &route, session, flags, &headers).await }
        },
    )
    .post(
        move |State(state): State<AppState>,
              session: Session,
              flags: Option<Extension<Flags>>,
              headers: HeaderMap,
              Form(form): Form<FormData>| {
            let route = on_post.clone();
            async move { submit_step(&state, &route, session, flags, &headers, form).await }
        },
    )
}

async fn show_step(
    state: &AppState,
    route: &StepRoute,
    session: Session,
    flags: Option<Extension<Flags>>,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    ensure_session_alive(route, &session)?;

    let mut data = session.snapshot();
    let outcome = route.wizard.get(&route.key, route.edit, &mut data).await?;
    session.replace(data.clone());

    respond(state, route, &data, flags, headers, outcome)
}

async fn submit_step(
    state: &AppState,
    route: &StepRoute,
    session: Session,
    flags: Option<Extension<Flags>>,
    headers: &HeaderMap,
    form: FormData,
) -> Result<Response, AppError> {
    if !session.had_cookie() {
        return Err(WizardError::CookiesRequired.into());
    }
    ensure_session_alive(route, &session)?;

    metrics::counter!("wizard.step.submitted", "wizard" => route.wizard.name().to_string())
        .increment(1);

    let mut data = session.snapshot();
    let outcome = route
        .wizard
        .post(&route.key, route.edit, &form, &mut data)
        .await?;
    session.replace(data.clone());

    if let StepOutcome::Render(view) = &outcome {
        if view.has_errors() {
            metrics::counter!("wizard.validation.failed", "wizard" => route.wizard.name().to_string())
                .increment(1);
        }
    }

    respond(state, route, &data, flags, headers, outcome)
}

/// A request whose session has expired may only restart at an entry point.
fn ensure_session_alive(route: &StepRoute, session: &Session) -> Result<(), AppError> {
    if session.expired() && !route.wizard.is_entry_point(&route.key) {
        return Err(WizardError::SessionEnded.into());
    }
    Ok(())
}

fn respond(
    state: &AppState,
    route: &StepRoute,
    session: &JourneySession,
    flags: Option<Extension<Flags>>,
    headers: &HeaderMap,
    outcome: StepOutcome,
) -> Result<Response, AppError> {
    match outcome {
        StepOutcome::Redirect(url) => {
            debug!(wizard = %route.wizard.name(), step = %route.key, next = %url, "Redirecting");
            Ok(Redirect::to(&url).into_response())
        }
        StepOutcome::Render(view) => {
            let accept_language = headers
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok());
            let locale = state.translator.negotiate(accept_language);
            let flags = flags.map(|Extension(f)| f).unwrap_or_default();
            let context = view_context(state, &view, session, &flags, &locale)?;
            let html = state.renderer.render(&view.template, &context)?;

            metrics::counter!("wizard.step.rendered", "wizard" => route.wizard.name().to_string())
                .increment(1);
            Ok(Html(html).into_response())
        }
    }
}

/// Template context for a step: the view itself, with labels, items and
/// error messages resolved for `locale`.
fn view_context(
    state: &AppState,
    view: &StepView,
    session: &JourneySession,
    flags: &Flags,
    locale: &str,
) -> WizardResult<Value> {
    let translator = state.translator.as_ref();
    let page_key = view.template.replace('/', ".");

    let fields: Vec<Value> = view
        .fields
        .iter()
        .map(|field| field_context(translator, locale, field))
        .collect::<WizardResult<_>>()?;

    let error_list: Vec<Value> = view
        .errors
        .iter()
        .map(|error| {
            let label = field_label(translator, locale, &error.key);
            json!({
                "key": error.key,
                "href": format!("#{}", error.key),
                "message": error_message(translator, locale, &label, error),
            })
        })
        .collect();

    let mut context = match serde_json::to_value(view)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    context.insert("fields".into(), Value::Array(fields));
    context.insert("errorList".into(), Value::Array(error_list));
    context.insert(
        "title".into(),
        translator
            .translate(locale, &format!("{page_key}.title"))
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    context.insert("appName".into(), json!(state.config.app_name));
    context.insert("locale".into(), json!(locale));
    context.insert("t".into(), translator.bundle(locale));
    context.insert("flags".into(), serde_json::to_value(flags)?);
    context.insert("urls".into(), json!({"public": state.config.urls.public}));
    context.insert("journey".into(), session.document.to_value());
    Ok(Value::Object(context))
}

fn field_context(translator: &Translator, locale: &str, field: &FieldView) -> WizardResult<Value> {
    let label = field_label(translator, locale, &field.name);
    let items: Vec<Value> = field
        .items
        .iter()
        .map(|item| {
            let text = translator
                .translate(locale, &format!("fields.{}.items.{item}.label", field.name))
                .unwrap_or_else(|| item.clone());
            json!({
                "value": item,
                "text": text,
                "checked": is_checked(&field.value, item),
            })
        })
        .collect();

    let mut context = match serde_json::to_value(field)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    context.insert("label".into(), json!(label));
    if let Some(hint) = translator.translate(locale, &format!("fields.{}.hint", field.name)) {
        context.insert("hint".into(), json!(hint));
    }
    context.insert("items".into(), Value::Array(items));
    context.insert("text".into(), json!(display_value(&field.value)));
    if let Some(error) = &field.error {
        context.insert(
            "errorMessage".into(),
            json!(error_message(translator, locale, &label, error)),
        );
    }
    Ok(Value::Object(context))
}

fn field_label(translator: &Translator, locale: &str, name: &str) -> String {
    translator
        .translate(locale, &format!("fields.{name}.label"))
        .unwrap_or_else(|| name.to_string())
}

fn error_message(translator: &Translator, locale: &str, label: &str, error: &FieldError) -> String {
    let keys = [
        format!("validation.{}.{}", error.key, error.kind),
        format!("validation.{}", error.kind),
        "validation.default".to_string(),
    ];
    let mut args = Map::new();
    args.insert("label".into(), json!(label.to_lowercase()));
    args.insert("args".into(), error.args.clone());
    translator
        .translate_with(locale, &keys, &args)
        .unwrap_or_else(|| format!("{label} is invalid"))
}

/// Radios store booleans and numbers after formatting; compare by text.
fn is_checked(value: &Value, item: &str) -> bool {
    match value {
        Value::Array(values) => values.iter().any(|v| is_checked(v, item)),
        Value::Null => false,
        other => display_value(other) == item,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HandlebarsRenderer;
    use crate::server::{setup, SetupOptions};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use govform_core::AppConfig;
    use govform_session::{CookieSigner, MemorySessionStore, SessionStore};
    use govform_wizard::{FieldDefinition, FieldType, NextSpec, StepDescriptor};
    use tower::ServiceExt;

    fn eligibility() -> Wizard {
        Wizard::builder("eligibility", "/eligibility")
            .field(
                "uk",
                FieldDefinition::new()
                    .journey_key("application.uk")
                    .field_type(FieldType::Radios)
                    .items(["true", "false"])
                    .formatter("boolean")
                    .validate("required"),
            )
            .step("/", StepDescriptor::new().entry_point().reset_journey().next("uk"))
            .step(
                "/uk",
                StepDescriptor::new().fields(["uk"]).next_when(vec![
                    NextSpec::rule("uk", json!(false), "ineligible"),
                    "done".into(),
                ]),
            )
            .step("/ineligible", StepDescriptor::new())
            .step("/done", StepDescriptor::new())
            .build()
            .unwrap()
    }

    fn renderer() -> HandlebarsRenderer {
        let mut renderer = HandlebarsRenderer::new();
        let templates = [
            ("pages/eligibility/index", "<h1>{{title}}</h1>"),
            (
                "pages/eligibility/uk",
                "<h1>{{title}}</h1>{{#each errorList}}<a href=\"{{href}}\">{{message}}</a>{{/each}}\
                 {{#each fields}}{{#each items}}<input value=\"{{value}}\"{{#if checked}} checked{{/if}}>{{text}}{{/each}}{{/each}}",
            ),
            ("pages/eligibility/ineligible", "ineligible"),
            ("pages/eligibility/done", "done"),
            ("errors/page-not-found", "<h1>Page not found</h1>"),
            ("errors/cookies-required", "<h1>{{t.errors.cookies}}</h1>"),
            ("errors/session-ended", "<h1>Session ended</h1>"),
            ("errors/error", "<h1>Error {{status}}</h1>"),
        ];
        for (name, source) in templates {
            renderer.register_template(name, source).unwrap();
        }
        renderer
    }

    fn translator() -> Translator {
        let mut translator = Translator::new("en");
        translator.add_bundle(
            "en",
            json!({
                "pages": {"eligibility": {"uk": {"title": "Do you live in the UK?"}}},
                "fields": {
                    "uk": {
                        "label": "Where you live",
                        "items": {"true": {"label": "Yes"}, "false": {"label": "No"}}
                    }
                },
                "validation": {"required": "Select {label}"},
                "errors": {"cookies": "Cookies are turned off"}
            }),
        );
        translator
    }

    async fn app() -> (Router, Arc<MemorySessionStore>) {
        let mut config = AppConfig::default();
        config.request_logging = false;
        let store = Arc::new(MemorySessionStore::new(config.session.ttl_secs));
        let options = SetupOptions::default()
            .with_store(store.clone())
            .with_renderer(Arc::new(renderer()))
            .with_translator(Arc::new(translator()));
        let router = setup(config, options)
            .await
            .unwrap()
            .wizard(eligibility())
            .into_router();
        (router, store)
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let value = response.headers()[header::SET_COOKIE].to_str().unwrap();
        value.split(';').next().unwrap().to_string()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_journey_through_http() {
        let (router, store) = app().await;

        let response = send(&router, get_request("/eligibility", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        assert_eq!(store.len(), 1);

        let response = send(&router, post_request("/eligibility", Some(&cookie), "")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/eligibility/uk");

        let response = send(&router, post_request("/eligibility/uk", Some(&cookie), "uk=true")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/eligibility/done");
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let response = send(&router, get_request("/eligibility/uk", Some(&cookie))).await;
        let body = body_text(response).await;
        assert!(body.contains("<h1>Do you live in the UK?</h1>"));
        assert!(body.contains("<input value=\"true\" checked>Yes"));
        assert!(body.contains("<input value=\"false\">No"));
    }

    #[tokio::test]
    async fn test_validation_errors_are_translated() {
        let (router, _) = app().await;
        let response = send(&router, get_request("/eligibility", None)).await;
        let cookie = session_cookie(&response);
        send(&router, post_request("/eligibility", Some(&cookie), "")).await;

        let response = send(&router, post_request("/eligibility/uk", Some(&cookie), "uk=")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("<a href=\"#uk\">Select where you live</a>"));
    }

    #[tokio::test]
    async fn test_post_without_cookie_requires_cookies() {
        let (router, _) = app().await;
        let response = send(&router, post_request("/eligibility/uk", None, "uk=true")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "<h1>Cookies are turned off</h1>");
    }

    #[tokio::test]
    async fn test_expired_session_ends_journey() {
        let (router, _) = app().await;
        let signer = CookieSigner::new(&AppConfig::default().session.secret);
        let stale = format!("govform.sid={}", signer.sign("gone"));

        let response = send(&router, get_request("/eligibility/uk", Some(&stale))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await, "<h1>Session ended</h1>");

        let response = send(&router, get_request("/eligibility", Some(&stale))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unreachable_step_redirects() {
        let (router, store) = app().await;
        let response = send(&router, get_request("/eligibility", None)).await;
        let cookie = session_cookie(&response);
        let id = CookieSigner::new(&AppConfig::default().session.secret)
            .verify(cookie.trim_start_matches("govform.sid="))
            .unwrap();
        assert!(store.load(&id).await.unwrap().is_some());

        let response = send(&router, get_request("/eligibility/done", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/eligibility");
    }

    #[tokio::test]
    async fn test_not_found_page_and_headers() {
        let (router, _) = app().await;
        let response = send(&router, get_request("/nowhere", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        assert_eq!(body_text(response).await, "<h1>Page not found</h1>");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (router, _) = app().await;

        let response = send(&router, get_request("/healthcheck", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "OK");

        let response = send(&router, get_request("/version", None)).await;
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["appName"], "govform");
        assert_eq!(body["env"], "development");
    }

    #[test]
    fn test_is_checked() {
        assert!(is_checked(&json!(true), "true"));
        assert!(!is_checked(&json!(false), "true"));
        assert!(is_checked(&json!(["a", "b"]), "b"));
        assert!(!is_checked(&Value::Null, ""));
    }
}
