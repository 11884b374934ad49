use crate::{
    api::handlers::{auth, health, oauth2, signin, totp, users, webauthn},
    store::{CredentialStore, PgStore},
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, auth_config: auth::AuthConfig) -> Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(connect(&dsn).await?);
    let auth_state = Arc::new(
        auth::AuthState::new(auth_config, store).context("Invalid WebAuthn configuration")?,
    );

    let app = app(auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Open the Postgres pool and make sure the schema exists.
///
/// # Errors
/// Returns an error if the database is unreachable or the schema cannot be applied.
pub async fn connect(dsn: &str) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store
        .apply_schema()
        .await
        .context("Failed to apply database schema")?;
    Ok(store)
}

/// Build the full application router over `auth_state`.
///
/// # Errors
/// Returns an error if the relying-party origin cannot be turned into a CORS origin.
pub fn app(auth_state: Arc<auth::AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().webauthn_rp_origin())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(webauthn::AUTH_TOKEN_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Everything here answers 401 before the handler runs when the bearer token is bad.
    let protected = Router::new()
        .route(
            "/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/:id/rotate-secret", post(users::rotate_secret))
        .route("/totp/qr-code-json", get(totp::qr_code_json))
        .route("/totp/qr-code-raw", get(totp::qr_code_raw))
        .route("/totp/confirm", post(totp::confirm))
        .route("/webauthn/register/begin", post(webauthn::register_begin))
        .route("/webauthn/register/finish", post(webauthn::register_finish))
        .route("/oauth2/authorize", post(oauth2::authorize))
        .route_layer(middleware::from_fn(auth::auth_layer));

    let app = Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/users", post(users::signup))
        .route("/signin", post(signin::signin))
        .route("/refresh", post(signin::refresh))
        .route("/webauthn/login/begin", post(webauthn::login_begin))
        .route("/webauthn/login/finish", post(webauthn::login_finish))
        .route("/oauth2/access_token", post(oauth2::access_token))
        .route("/oauth2/clients/:id", get(oauth2::client))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid relying party origin: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Relying party origin must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build CORS origin header")
}
