/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Poloniex adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod client;
pub mod http;
pub mod types;
pub mod ws;

pub use client::Poloniex;

// Re-export commonly used types from http
pub use http::{
    ClientConfig,
    Credentials,
    ErrorKind,
    NonceSource,
    PoloniexClient,
    PoloniexError,
    RequestSigner,
    Result,
    SignedRequest,
};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    Control,
    MarketEvent,
    MarketUpdate,
    ReconnectPolicy,
    StreamClient,
    StreamConfig,
    Subscription,
    SubscriptionState,
    TickerUpdate,
    Topic,
    Update,
};
