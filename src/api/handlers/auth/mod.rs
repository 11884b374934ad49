//! Authentication plumbing shared by the handlers: configuration, state and the
//! bearer token gate for protected routes.

mod principal;
pub mod state;
pub(crate) mod utils;

pub use principal::{auth_layer, authenticate, require_auth, Principal, Rejection};
pub use state::{AuthConfig, AuthState};
