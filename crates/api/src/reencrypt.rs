// Path: crates/api/src/reencrypt.rs

//! The rewrap seam towards the out-of-process key-custody service.

use arca_types::error::RewrapError;
use async_trait::async_trait;

/// Rewraps a stored encryption header for a new recipient.
///
/// The implementation is the only place allowed to talk to the service
/// holding the long-term secret key; no key material crosses this boundary.
/// Timeouts and failures propagate without retry.
#[async_trait]
pub trait HeaderRewrap: Send + Sync {
    /// Produces a new header granting `recipient_public_key` (base64-encoded
    /// 32-byte key) access to the same body `old_header` protects.
    async fn reencrypt_header(
        &self,
        old_header: &[u8],
        recipient_public_key: &str,
    ) -> Result<Vec<u8>, RewrapError>;
}
