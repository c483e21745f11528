//! Vault lifecycle: authentication, creation, and the open-vault handle.

pub mod auth;
pub mod create;
pub mod manager;
pub mod session;

pub use auth::{open_legacy, AuthState, Authenticator};
pub use create::{CreateParams, CreateStep};
pub use manager::{UserInfo, Vault};
pub use session::UserSession;
