//! Multi-factor sign-in.
//!
//! One request runs one pass of a small state machine:
//!
//! ```text
//! Start ──password──▶ PasswordVerified ──┐
//!   │                                    ├──▶ SecondFactorPending ──▶ Granted
//!   └──ticket──▶ Resumed ────────────────┘
//! ```
//!
//! Any state may finish early with a denial or a continuation (422). WebAuthn is
//! checked before TOTP; a user with both enabled is never asked for a TOTP code.

use crate::{
    error::{AuthReason, ErrorCode},
    ledger::{self, Origin, Purpose, Ticket, TicketError},
    otp::{self, TotpEngine},
    password,
    store::{CredentialStore, StoreError, User},
    token,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug, Clone, Default)]
pub struct SigninRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub signin_session_token: Option<String>,
    pub totp: Option<String>,
    pub webauthn_session_token: Option<String>,
}

/// Faults that end in a 500; nothing here is the caller's fault.
#[derive(Debug, Error)]
pub enum SigninError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Token(#[from] token::Error),
    #[error(transparent)]
    Otp(#[from] otp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Granted {
        user_id: Uuid,
        token: String,
        exp: i64,
    },
    /// More proof needed; `ticket` resumes the attempt.
    ContinuationRequired { code: ErrorCode, ticket: String },
    Denied {
        code: ErrorCode,
        user_id: Option<Uuid>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    Webauthn,
    Totp,
}

impl Factor {
    /// Factor that governs `user`, WebAuthn first.
    #[must_use]
    pub fn required_by(user: &User) -> Option<Self> {
        if user.webauthn_enabled {
            Some(Self::Webauthn)
        } else if user.totp_enabled {
            Some(Self::Totp)
        } else {
            None
        }
    }

    const fn awaiting(self) -> Purpose {
        match self {
            Self::Webauthn => Purpose::AwaitWebauthn,
            Self::Totp => Purpose::AwaitTotp,
        }
    }

    const fn required_code(self) -> ErrorCode {
        match self {
            Self::Webauthn => ErrorCode::Authentication(AuthReason::WebauthnRequired),
            Self::Totp => ErrorCode::Authentication(AuthReason::TotpRequired),
        }
    }

    const fn event_name(self) -> &'static str {
        match self {
            Self::Webauthn => ledger::WEBAUTHN_REQUIRED,
            Self::Totp => ledger::TOTP_REQUIRED,
        }
    }
}

enum State {
    Start,
    PasswordVerified {
        user: User,
    },
    Resumed {
        user: User,
        ticket: Ticket,
    },
    SecondFactorPending {
        user: User,
        factor: Factor,
        ticket: Option<Ticket>,
    },
    Granted {
        user: User,
    },
}

enum Step {
    Next(State),
    Done(Outcome),
}

fn deny(reason: AuthReason, user_id: Option<Uuid>) -> Step {
    Step::Done(Outcome::Denied {
        code: ErrorCode::Authentication(reason),
        user_id,
    })
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Everything one sign-in attempt needs.
pub struct Signin<'a> {
    pub store: &'a dyn CredentialStore,
    pub otp: &'a TotpEngine,
    pub issuer: &'a str,
    pub platform: &'a str,
    pub session_ttl_seconds: i64,
    pub continuation_ttl_seconds: i64,
    pub origin: Origin,
    pub now: i64,
}

impl Signin<'_> {
    /// Drive `request` to a terminal outcome. Denials are written to the ledger
    /// before returning.
    ///
    /// # Errors
    /// Returns [`SigninError`] on store or crypto faults.
    pub async fn run(&self, request: &SigninRequest) -> Result<Outcome, SigninError> {
        let mut state = State::Start;
        let outcome = loop {
            match self.step(request, state).await? {
                Step::Next(next) => state = next,
                Step::Done(outcome) => break outcome,
            }
        };

        if let Outcome::Denied { code, user_id } = &outcome {
            debug!("sign-in denied with code {}", code.code());
            ledger::record_best_effort(self.store, *user_id, code.message(), &self.origin, self.now)
                .await;
        }
        Ok(outcome)
    }

    async fn step(&self, request: &SigninRequest, state: State) -> Result<Step, SigninError> {
        match state {
            State::Start => self.start(request).await,
            State::PasswordVerified { user } => Ok(Step::Next(match Factor::required_by(&user) {
                Some(factor) => State::SecondFactorPending {
                    user,
                    factor,
                    ticket: None,
                },
                None => State::Granted { user },
            })),
            State::Resumed { user, ticket } => {
                let Some(factor) = Factor::required_by(&user) else {
                    return Ok(deny(AuthReason::SigninSessionTokenDecodingFailed, Some(user.id)));
                };
                match ticket.check(factor.awaiting(), self.now) {
                    Ok(()) => Ok(Step::Next(State::SecondFactorPending {
                        user,
                        factor,
                        ticket: Some(ticket),
                    })),
                    Err(err) => Ok(deny(ticket_reason(err)?, Some(user.id))),
                }
            }
            State::SecondFactorPending {
                user,
                factor,
                ticket,
            } => self.second_factor(request, user, factor, ticket).await,
            State::Granted { user } => self.grant(user).await,
        }
    }

    async fn start(&self, request: &SigninRequest) -> Result<Step, SigninError> {
        if let Some(token) = present(request.signin_session_token.as_ref()) {
            return self.resume(token).await;
        }

        let (Some(username), Some(password)) = (
            present(request.username.as_ref()),
            request.password.as_deref().filter(|p| !p.is_empty()),
        ) else {
            return Ok(Step::Done(Outcome::Denied {
                code: ErrorCode::Authentication(AuthReason::MissingCredentials),
                user_id: None,
            }));
        };

        let user = match self.store.find_user_by_email(self.platform, username).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                password::verify_dummy(password);
                return Ok(deny(AuthReason::UsernameOrPasswordDoesNotMatch, None));
            }
            Err(err) => return Err(err.into()),
        };

        if !password::verify_password(password, &user.password_hash) {
            return Ok(deny(
                AuthReason::UsernameOrPasswordDoesNotMatch,
                Some(user.id),
            ));
        }
        Ok(Step::Next(State::PasswordVerified { user }))
    }

    async fn resume(&self, token: &str) -> Result<Step, SigninError> {
        let id = match ledger::decode_ticket(token) {
            Ok(id) => id,
            Err(err) => return Ok(deny(ticket_reason(err)?, None)),
        };
        let event = match self.store.get_event(id).await {
            Ok(event) => event,
            Err(StoreError::NotFound) => {
                return Ok(deny(AuthReason::SigninSessionTokenDecodingFailed, None))
            }
            Err(err) => return Err(err.into()),
        };
        let ticket = Ticket::from(&event);
        if self.now >= ticket.expires_at {
            return Ok(deny(AuthReason::SigninSessionExpired, ticket.user_id));
        }

        let Some(user_id) = ticket.user_id else {
            return Ok(deny(AuthReason::UserUnknown, None));
        };
        match self.store.get_user(user_id).await {
            Ok(user) => Ok(Step::Next(State::Resumed { user, ticket })),
            Err(StoreError::NotFound) => Ok(deny(AuthReason::UserUnknown, Some(user_id))),
            Err(err) => Err(err.into()),
        }
    }

    async fn second_factor(
        &self,
        request: &SigninRequest,
        user: User,
        factor: Factor,
        ticket: Option<Ticket>,
    ) -> Result<Step, SigninError> {
        let proof = match factor {
            Factor::Webauthn => present(request.webauthn_session_token.as_ref()),
            Factor::Totp => present(request.totp.as_ref()),
        };
        let Some(proof) = proof else {
            return self.continuation(&user, factor, ticket).await;
        };

        // The continuation is used up before the factor is checked, so a wrong
        // code cannot be retried on the same ticket.
        if let Some(ticket) = &ticket {
            match self.store.claim_event(ticket.id, self.now).await {
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    return Ok(deny(AuthReason::SigninSessionExpired, Some(user.id)))
                }
                Err(err) => return Err(err.into()),
            }
        }

        match factor {
            Factor::Webauthn => {
                let owner = match ledger::redeem(self.store, proof, Purpose::WebauthnProof, self.now)
                    .await
                {
                    Ok(proof) => proof.user_id,
                    Err(TicketError::Store(err)) => return Err(err.into()),
                    Err(_) => return Ok(deny(AuthReason::WebauthnAuthFailure, Some(user.id))),
                };
                if owner != Some(user.id) {
                    return Ok(deny(AuthReason::WebauthnAuthFailure, Some(user.id)));
                }
            }
            Factor::Totp => {
                let Some(secret) = user.totp_secret.as_deref() else {
                    return Ok(deny(AuthReason::TotpAuthFailure, Some(user.id)));
                };
                if !self.otp.verify(secret, proof, self.now)? {
                    return Ok(deny(AuthReason::TotpAuthFailure, Some(user.id)));
                }
            }
        }
        Ok(Step::Next(State::Granted { user }))
    }

    /// Answer 422. A resumed attempt gets its own ticket back so the window never grows.
    async fn continuation(
        &self,
        user: &User,
        factor: Factor,
        ticket: Option<Ticket>,
    ) -> Result<Step, SigninError> {
        let ticket = match ticket {
            Some(ticket) => {
                ledger::record_best_effort(
                    self.store,
                    Some(user.id),
                    factor.event_name(),
                    &self.origin,
                    self.now,
                )
                .await;
                ticket
            }
            None => {
                ledger::issue_ticket(
                    self.store,
                    user.id,
                    factor.event_name(),
                    factor.awaiting(),
                    &self.origin,
                    self.now,
                    self.continuation_ttl_seconds,
                )
                .await?
            }
        };
        Ok(Step::Done(Outcome::ContinuationRequired {
            code: factor.required_code(),
            ticket: ticket.token(),
        }))
    }

    async fn grant(&self, user: User) -> Result<Step, SigninError> {
        if user.id.is_nil() {
            return Ok(deny(AuthReason::UserUnknown, None));
        }
        let (token, exp) = token::encode(
            &user.id.to_string(),
            user.signing_key(),
            self.issuer,
            self.session_ttl_seconds,
            self.now,
        )?;
        ledger::record_best_effort(
            self.store,
            Some(user.id),
            ledger::LOGIN_SUCCESSFUL,
            &self.origin,
            self.now,
        )
        .await;
        info!(user_id = %user.id, "sign-in granted");
        Ok(Step::Done(Outcome::Granted {
            user_id: user.id,
            token,
            exp,
        }))
    }
}

/// Map a rejected continuation ticket onto the reason reported to the client.
pub(crate) fn ticket_reason(err: TicketError) -> Result<AuthReason, SigninError> {
    match err {
        TicketError::Malformed | TicketError::Unknown | TicketError::WrongPurpose => {
            Ok(AuthReason::SigninSessionTokenDecodingFailed)
        }
        TicketError::Expired | TicketError::AlreadyUsed => Ok(AuthReason::SigninSessionExpired),
        TicketError::Store(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{
        AccessTokenRecord, AuthEvent, AuthorizationCode, Client, MemoryStore, ProfileUpdate,
        StoreResult, UserCredential, UserGrants,
    };
    use secrecy::SecretString;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        store: MemoryStore,
        otp: TotpEngine,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                otp: TotpEngine::new("custos"),
            }
        }

        fn signin(&self, now: i64) -> Signin<'_> {
            attempt(&self.store, &self.otp, now)
        }

        async fn user(&self, email: &str, totp: Option<&str>, webauthn: bool) -> User {
            let user = User {
                id: Uuid::new_v4(),
                platform: "web".to_string(),
                email: email.to_string(),
                password_hash: password::hash_password("p1").unwrap(),
                first_name: String::new(),
                last_name: String::new(),
                created_at: NOW,
                totp_enabled: totp.is_some(),
                totp_secret: totp.map(str::to_string),
                totp_pending_secret: None,
                totp_pending_expires_at: None,
                webauthn_enabled: webauthn,
                webauthn_session: None,
                signing_secret: SecretString::from(format!("secret-{email}")),
            };
            self.store.register_user(&user).await.unwrap();
            user
        }
    }

    fn attempt<'a>(store: &'a dyn CredentialStore, otp: &'a TotpEngine, now: i64) -> Signin<'a> {
        Signin {
            store,
            otp,
            issuer: "custos",
            platform: "web",
            session_ttl_seconds: 3600,
            continuation_ttl_seconds: 300,
            origin: Origin {
                ip_address: "203.0.113.7".to_string(),
                user_agent: "test".to_string(),
            },
            now,
        }
    }

    fn password_request(username: &str, password: &str) -> SigninRequest {
        SigninRequest {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..SigninRequest::default()
        }
    }

    fn resume_request(ticket: &str, totp: Option<String>) -> SigninRequest {
        SigninRequest {
            signin_session_token: Some(ticket.to_string()),
            totp,
            ..SigninRequest::default()
        }
    }

    fn continuation(outcome: Outcome) -> (ErrorCode, String) {
        match outcome {
            Outcome::ContinuationRequired { code, ticket } => (code, ticket),
            other => panic!("expected continuation, got {other:?}"),
        }
    }

    fn denial(outcome: &Outcome) -> u16 {
        match outcome {
            Outcome::Denied { code, .. } => code.code(),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn password_only_user_is_granted() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let user = fx.user("a@x.com", None, false).await;
        let outcome = fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?;
        let Outcome::Granted {
            user_id,
            token,
            exp,
        } = outcome
        else {
            panic!("expected grant");
        };
        assert_eq!(user_id, user.id);
        assert_eq!(exp, NOW + 3600);
        let claims = token::decode(&token, user.signing_key(), NOW)?;
        assert_eq!(claims.sub, user.id.to_string());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.user("a@x.com", None, false).await;
        let wrong = fx.signin(NOW).run(&password_request("a@x.com", "nope")).await?;
        let unknown = fx.signin(NOW).run(&password_request("b@x.com", "p1")).await?;
        assert_eq!(denial(&wrong), 4300);
        assert_eq!(denial(&unknown), 4300);
        Ok(())
    }

    #[tokio::test]
    async fn empty_request_is_rejected() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let outcome = fx.signin(NOW).run(&SigninRequest::default()).await?;
        assert_eq!(denial(&outcome), 4930);
        Ok(())
    }

    #[tokio::test]
    async fn totp_continuation_then_grant() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        let user = fx.user("a@x.com", Some(&secret), false).await;

        let (code, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);
        assert_eq!(code.code(), 4800);

        let totp = fx.otp.generate(&secret, NOW + 20)?;
        let outcome = fx
            .signin(NOW + 20)
            .run(&resume_request(&ticket, Some(totp)))
            .await?;
        assert!(matches!(outcome, Outcome::Granted { user_id, .. } if user_id == user.id));
        Ok(())
    }

    #[tokio::test]
    async fn totp_code_with_password_skips_the_round_trip() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        fx.user("a@x.com", Some(&secret), false).await;
        let mut request = password_request("a@x.com", "p1");
        request.totp = Some(fx.otp.generate(&secret, NOW)?);
        let outcome = fx.signin(NOW).run(&request).await?;
        assert!(matches!(outcome, Outcome::Granted { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_totp_code_burns_the_ticket() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        fx.user("a@x.com", Some(&secret), false).await;
        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);

        let good = fx.otp.generate(&secret, NOW)?;
        let window = [
            fx.otp.generate(&secret, NOW - 30)?,
            good.clone(),
            fx.otp.generate(&secret, NOW + 30)?,
        ];
        let bad = ["000000", "111111", "222222", "333333"]
            .into_iter()
            .find(|c| !window.iter().any(|w| w == c))
            .unwrap();
        let outcome = fx
            .signin(NOW)
            .run(&resume_request(&ticket, Some(bad.to_string())))
            .await?;
        assert_eq!(denial(&outcome), 4500);

        let outcome = fx
            .signin(NOW)
            .run(&resume_request(&ticket, Some(good)))
            .await?;
        assert_eq!(denial(&outcome), 4200);
        Ok(())
    }

    #[tokio::test]
    async fn expired_ticket_is_rejected_even_with_a_good_code() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        fx.user("a@x.com", Some(&secret), false).await;
        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);

        let later = NOW + 301;
        let totp = fx.otp.generate(&secret, later)?;
        let outcome = fx
            .signin(later)
            .run(&resume_request(&ticket, Some(totp)))
            .await?;
        assert_eq!(denial(&outcome), 4200);
        Ok(())
    }

    #[tokio::test]
    async fn resuming_without_a_code_returns_the_same_ticket() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        fx.user("a@x.com", Some(&secret), false).await;
        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);
        let (code, again) = continuation(
            fx.signin(NOW + 100)
                .run(&resume_request(&ticket, None))
                .await?,
        );
        assert_eq!(code.code(), 4800);
        assert_eq!(again, ticket);
        Ok(())
    }

    #[tokio::test]
    async fn webauthn_takes_precedence_over_totp() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let secret = fx.otp.new_secret();
        fx.user("a@x.com", Some(&secret), true).await;
        let mut request = password_request("a@x.com", "p1");
        request.totp = Some(fx.otp.generate(&secret, NOW)?);
        let (code, _) = continuation(fx.signin(NOW).run(&request).await?);
        assert_eq!(code.code(), 4900);
        Ok(())
    }

    #[tokio::test]
    async fn webauthn_proof_must_belong_to_the_user() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let alice = fx.user("a@x.com", None, true).await;
        let mallory = fx.user("m@x.com", None, true).await;
        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);

        let foreign = ledger::issue_ticket(
            &fx.store,
            mallory.id,
            ledger::SEC_AUTH_SUCCESS,
            Purpose::WebauthnProof,
            &Origin::default(),
            NOW,
            300,
        )
        .await?;
        let request = SigninRequest {
            signin_session_token: Some(ticket),
            webauthn_session_token: Some(foreign.token()),
            ..SigninRequest::default()
        };
        let outcome = fx.signin(NOW).run(&request).await?;
        assert_eq!(denial(&outcome), 4400);

        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("a@x.com", "p1")).await?);
        let proof = ledger::issue_ticket(
            &fx.store,
            alice.id,
            ledger::SEC_AUTH_SUCCESS,
            Purpose::WebauthnProof,
            &Origin::default(),
            NOW,
            300,
        )
        .await?;
        let request = SigninRequest {
            signin_session_token: Some(ticket),
            webauthn_session_token: Some(proof.token()),
            ..SigninRequest::default()
        };
        let outcome = fx.signin(NOW).run(&request).await?;
        assert!(matches!(outcome, Outcome::Granted { user_id, .. } if user_id == alice.id));
        Ok(())
    }

    #[tokio::test]
    async fn totp_ticket_cannot_satisfy_webauthn() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let user = fx.user("a@x.com", None, true).await;
        let wrong = ledger::issue_ticket(
            &fx.store,
            user.id,
            ledger::TOTP_REQUIRED,
            Purpose::AwaitTotp,
            &Origin::default(),
            NOW,
            300,
        )
        .await?;
        let outcome = fx
            .signin(NOW)
            .run(&resume_request(&wrong.token(), None))
            .await?;
        assert_eq!(denial(&outcome), 4100);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_ticket_is_a_decoding_failure() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let outcome = fx
            .signin(NOW)
            .run(&resume_request("not-a-ticket", None))
            .await?;
        assert_eq!(denial(&outcome), 4100);
        Ok(())
    }

    /// Users named by the denial rows recorded under `message`.
    async fn denied_users(store: &MemoryStore, message: &str) -> Vec<Option<Uuid>> {
        store
            .events()
            .await
            .into_iter()
            .filter(|event| event.purpose.is_none() && event.name == message)
            .map(|event| event.user_id)
            .collect()
    }

    fn code_outside_window(otp: &TotpEngine, secret: &str, at: i64) -> anyhow::Result<String> {
        let mut window = Vec::new();
        for step in -1..=1 {
            window.push(otp.generate(secret, at + step * 30)?);
        }
        ["000000", "111111", "222222", "333333"]
            .into_iter()
            .find(|code| !window.iter().any(|w| w == code))
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no free code"))
    }

    #[tokio::test]
    async fn every_denial_is_written_to_the_ledger() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let alice = fx.user("a@x.com", None, false).await;
        let secret = fx.otp.new_secret();
        let bob = fx.user("b@x.com", Some(&secret), false).await;

        let credentials = ErrorCode::Authentication(AuthReason::UsernameOrPasswordDoesNotMatch);
        fx.signin(NOW).run(&password_request("a@x.com", "nope")).await?;
        assert_eq!(denied_users(&fx.store, credentials.message()).await, vec![Some(alice.id)]);

        fx.signin(NOW).run(&password_request("ghost@x.com", "p1")).await?;
        let rows = denied_users(&fx.store, credentials.message()).await;
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&None));

        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("b@x.com", "p1")).await?);
        let bad = code_outside_window(&fx.otp, &secret, NOW)?;
        fx.signin(NOW).run(&resume_request(&ticket, Some(bad))).await?;
        let totp = ErrorCode::Authentication(AuthReason::TotpAuthFailure);
        assert_eq!(denied_users(&fx.store, totp.message()).await, vec![Some(bob.id)]);

        let (_, ticket) =
            continuation(fx.signin(NOW).run(&password_request("b@x.com", "p1")).await?);
        let later = NOW + 301;
        let code = fx.otp.generate(&secret, later)?;
        let outcome = fx.signin(later).run(&resume_request(&ticket, Some(code))).await?;
        assert_eq!(denial(&outcome), 4200);
        let expired = ErrorCode::Authentication(AuthReason::SigninSessionExpired);
        assert_eq!(denied_users(&fx.store, expired.message()).await, vec![Some(bob.id)]);
        Ok(())
    }

    /// Store whose ledger writes always fail; everything else is in memory.
    struct LedgerDown(MemoryStore);

    #[async_trait::async_trait]
    impl CredentialStore for LedgerDown {
        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
        async fn register_user(&self, user: &User) -> StoreResult<()> {
            self.0.register_user(user).await
        }
        async fn get_user(&self, id: Uuid) -> StoreResult<User> {
            self.0.get_user(id).await
        }
        async fn find_user_by_email(&self, platform: &str, email: &str) -> StoreResult<User> {
            self.0.find_user_by_email(platform, email).await
        }
        async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
            self.0.delete_user(id).await
        }
        async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> StoreResult<()> {
            self.0.update_profile(id, update).await
        }
        async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
            self.0.update_password(id, password_hash).await
        }
        async fn update_totp_pending(
            &self,
            id: Uuid,
            secret: &str,
            expires_at: i64,
        ) -> StoreResult<()> {
            self.0.update_totp_pending(id, secret, expires_at).await
        }
        async fn enable_totp(&self, id: Uuid, secret: &str) -> StoreResult<()> {
            self.0.enable_totp(id, secret).await
        }
        async fn disable_totp(&self, id: Uuid) -> StoreResult<()> {
            self.0.disable_totp(id).await
        }
        async fn update_webauthn_session(
            &self,
            id: Uuid,
            session: Option<&str>,
        ) -> StoreResult<()> {
            self.0.update_webauthn_session(id, session).await
        }
        async fn enable_webauthn(&self, id: Uuid) -> StoreResult<()> {
            self.0.enable_webauthn(id).await
        }
        async fn rotate_signing_secret(&self, id: Uuid, secret: &str) -> StoreResult<()> {
            self.0.rotate_signing_secret(id, secret).await
        }
        async fn record_event(&self, _event: &AuthEvent) -> StoreResult<()> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_event(&self, id: Uuid) -> StoreResult<AuthEvent> {
            self.0.get_event(id).await
        }
        async fn claim_event(&self, id: Uuid, now: i64) -> StoreResult<AuthEvent> {
            self.0.claim_event(id, now).await
        }
        async fn save_credential(&self, credential: &UserCredential) -> StoreResult<()> {
            self.0.save_credential(credential).await
        }
        async fn list_credentials(&self, user_id: Uuid) -> StoreResult<Vec<UserCredential>> {
            self.0.list_credentials(user_id).await
        }
        async fn update_credential(&self, id: Uuid, credential: &str) -> StoreResult<()> {
            self.0.update_credential(id, credential).await
        }
        async fn register_client(&self, client: &Client) -> StoreResult<()> {
            self.0.register_client(client).await
        }
        async fn get_client(&self, id: &str) -> StoreResult<Client> {
            self.0.get_client(id).await
        }
        async fn upsert_grants(&self, grants: &UserGrants) -> StoreResult<()> {
            self.0.upsert_grants(grants).await
        }
        async fn get_grants(&self, user_id: Uuid, client_id: &str) -> StoreResult<UserGrants> {
            self.0.get_grants(user_id, client_id).await
        }
        async fn save_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()> {
            self.0.save_authorization_code(code).await
        }
        async fn consume_authorization_code(
            &self,
            code: &str,
            client_id: &str,
        ) -> StoreResult<AuthorizationCode> {
            self.0.consume_authorization_code(code, client_id).await
        }
        async fn save_access_token(&self, record: &AccessTokenRecord) -> StoreResult<()> {
            self.0.save_access_token(record).await
        }
        async fn get_access_token(&self, token_id: &str) -> StoreResult<AccessTokenRecord> {
            self.0.get_access_token(token_id).await
        }
        async fn revoke_access_token(&self, token_id: &str) -> StoreResult<()> {
            self.0.revoke_access_token(token_id).await
        }
        async fn record_nonce(&self, client_id: &str, nonce: &str, now: i64) -> StoreResult<bool> {
            self.0.record_nonce(client_id, nonce, now).await
        }
    }

    #[tokio::test]
    async fn denial_survives_a_failed_ledger_write() -> anyhow::Result<()> {
        let fx = Fixture::new();
        fx.user("a@x.com", None, false).await;
        let store = LedgerDown(fx.store);

        let outcome = attempt(&store, &fx.otp, NOW)
            .run(&password_request("a@x.com", "nope"))
            .await?;
        assert_eq!(denial(&outcome), 4300);

        let outcome = attempt(&store, &fx.otp, NOW)
            .run(&password_request("ghost@x.com", "p1"))
            .await?;
        assert_eq!(denial(&outcome), 4300);
        assert!(store.0.events().await.is_empty());
        Ok(())
    }
}
