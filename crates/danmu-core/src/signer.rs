//! Opaque signature capability.
//!
//! Some platforms require the WebSocket URL to carry a signature computed by
//! an algorithm we do not implement. Adapters receive a `Signer` and treat it
//! as a black box.

use async_trait::async_trait;

use crate::error::SignError;

#[async_trait]
pub trait Signer: Send + Sync + 'static {
    /// Sign `input` (typically a digest of the request parameters).
    async fn sign(&self, input: &str) -> Result<String, SignError>;
}

/// Returns the same signature for every input.
///
/// Useful when the signature is obtained out of band, and in tests.
#[derive(Debug, Clone)]
pub struct StaticSigner(pub String);

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, _input: &str) -> Result<String, SignError> {
        if self.0.is_empty() {
            return Err(SignError::Empty);
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_signer() {
        let s = StaticSigner("abc".into());
        assert_eq!(s.sign("anything").await.unwrap(), "abc");
        assert!(matches!(
            StaticSigner(String::new()).sign("x").await,
            Err(SignError::Empty)
        ));
    }
}
