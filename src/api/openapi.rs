use super::handlers::{health, oauth2, signin, totp, users, webauthn};
use crate::{
    error::ErrorBody,
    oauth2::{AuthorizeRequest, AuthorizeResponse, ClientInfo, TokenRequest, TokenResponse},
    signin::SigninRequest,
};
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        Contact, InfoBuilder, License, Tag,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        users::signup,
        users::get_user,
        users::update_user,
        users::delete_user,
        users::rotate_secret,
        signin::signin,
        signin::refresh,
        totp::qr_code_json,
        totp::qr_code_raw,
        totp::confirm,
        webauthn::register_begin,
        webauthn::register_finish,
        webauthn::login_begin,
        webauthn::login_finish,
        oauth2::authorize,
        oauth2::access_token,
        oauth2::client,
    ),
    components(schemas(
        ErrorBody,
        health::Health,
        users::Signup,
        users::UserPatch,
        users::UserResource,
        users::RotatedToken,
        SigninRequest,
        signin::SessionToken,
        signin::RefreshRequest,
        totp::QrCode,
        totp::TotpConfirm,
        webauthn::LoginProof,
        AuthorizeRequest,
        AuthorizeResponse,
        TokenRequest,
        TokenResponse,
        ClientInfo,
    )),
    modifiers(&BearerAuth)
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut openapi = ApiDoc::openapi();
    openapi.info = cargo_info();
    openapi.tags = Some(vec![
        tag("health", "Service health"),
        tag("users", "Signup and profile management"),
        tag("signin", "Multi-factor sign-in and token refresh"),
        tag("totp", "Authenticator app enrollment"),
        tag("webauthn", "Security key ceremonies"),
        tag("oauth2", "Authorization-code grant for third-party clients"),
    ]);
    openapi
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

// Cargo.toml metadata instead of the derive defaults.
fn cargo_info() -> utoipa::openapi::Info {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (
                (!name.is_empty()).then_some(name),
                (!email.is_empty()).then_some(email),
            )
        }
        None => {
            let name = author.trim();
            ((!name.is_empty()).then_some(name), None)
        }
    }
}
