/*
[INPUT]:  HTTP client configuration, credentials and API endpoints
[OUTPUT]: HTTP responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod command;
pub mod error;
pub mod nonce;
pub mod public;
pub mod signature;
pub mod trade;
pub mod user;

pub use error::{ErrorKind, PoloniexError, Result};
pub use nonce::NonceSource;
pub use signature::RequestSigner;

pub use client::{ClientConfig, Credentials, PoloniexClient};
pub use command::SignedRequest;
