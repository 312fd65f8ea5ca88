//! Etsy OAuth authentication library
//!
//! Provides the PKCE flow, the OAuth handshake state machine, encrypted
//! credential storage, and the token lifecycle manager for the Etsy shop
//! toolkit. This crate is a standalone library with no dependency on the
//! API client or CLI — it can be tested and used independently.
//!
//! Authorization flow:
//! 1. `OauthHandshake::auth_url()` — open in a browser, user authorizes
//! 2. `OauthHandshake::extract_code()` — parse the pasted redirect URL
//! 3. `OauthHandshake::exchange_code()` — trade the code for tokens
//! 4. `TokenManager::save_tokens()` — persist via `CredentialStore`
//! 5. `TokenManager::access_token()` — transparent refresh-on-expiry from
//!    here on

pub mod constants;
pub mod credentials;
pub mod encryption;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod pkce;

pub use constants::*;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use handshake::{HandshakeState, OauthHandshake, TokenResponse};
pub use lifecycle::TokenManager;
pub use pkce::{PkcePair, compute_challenge, generate_state};
