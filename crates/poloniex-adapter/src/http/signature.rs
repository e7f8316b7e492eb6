/*
[INPUT]:  API secret bytes and serialized request bodies
[OUTPUT]: Hex-encoded HMAC-SHA512 signatures (Sign header)
[POS]:    HTTP layer - request signing for private endpoints
[UPDATE]: When changing signing algorithm or header format
*/

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::http::{PoloniexError, Result};

type HmacSha512 = Hmac<Sha512>;

/// Signs form-encoded request bodies for private endpoints
#[derive(Clone)]
pub struct RequestSigner {
    mac: HmacSha512,
}

impl RequestSigner {
    /// Create a new request signer keyed with the API secret
    pub fn new(secret: &[u8]) -> Result<Self> {
        let mac = HmacSha512::new_from_slice(secret)
            .map_err(|err| PoloniexError::Config(format!("invalid API secret: {err}")))?;
        Ok(Self { mac })
    }

    /// Sign the exact bytes that go on the wire.
    ///
    /// Returns the lowercase hex digest expected in the `Sign` header.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner").finish_non_exhaustive()
    }
}
