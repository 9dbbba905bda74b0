//! Key material resolver: the decoder chain plus password handling and
//! key-id selection for key sets.

use std::fmt;
use std::sync::Arc;

use crate::decoder::{check_kind, Decoded, Decoder};
use crate::error::{Error, Result};
use crate::handle::{KeyContainer, KeyHandle, KeyKind, KeyOrigin, KeyPair};
use crate::password::{PasswordSource, TerminalPassword};

/// Turns raw key bytes into typed handles.
///
/// Stateless: nothing is cached between calls, so resolving the same bytes
/// twice yields equal handles.
#[derive(Clone)]
pub struct Resolver {
    password: Arc<dyn PasswordSource>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(TerminalPassword)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(password: impl PasswordSource + 'static) -> Self {
        Self {
            password: Arc::new(password),
        }
    }

    pub fn with_source(password: Arc<dyn PasswordSource>) -> Self {
        Self { password }
    }

    /// Resolve both halves. The public half is derived when the material
    /// holds a private key; a public-only blob gives no private half.
    pub fn resolve_key_pair(&self, bytes: &[u8], allow_password_prompt: bool, key_id: &str) -> Result<KeyPair> {
        let handle = self.resolve(bytes, allow_password_prompt, key_id)?;
        Ok(KeyPair::from_handle(handle))
    }

    pub fn resolve_private(&self, bytes: &[u8], allow_password_prompt: bool, key_id: &str) -> Result<KeyHandle> {
        let handle = self.resolve(bytes, allow_password_prompt, key_id)?;
        check_kind(handle, KeyKind::Private)
    }

    pub fn resolve_public(&self, bytes: &[u8], allow_password_prompt: bool, key_id: &str) -> Result<KeyHandle> {
        let handle = self.resolve(bytes, allow_password_prompt, key_id)?;
        check_kind(handle, KeyKind::Public)
    }

    fn resolve(&self, bytes: &[u8], allow_password_prompt: bool, key_id: &str) -> Result<KeyHandle> {
        let decoded = Decoder::new(self.password.as_ref(), allow_password_prompt).decode(bytes)?;
        let handle = match decoded {
            Decoded::Single(handle) => {
                // DER and PEM keys carry no identifier to compare against.
                if !key_id.is_empty() && handle.origin() == KeyOrigin::Jwk && handle.kid() != Some(key_id) {
                    return Err(Error::KeyNotFound(key_id.to_string()));
                }
                handle
            }
            Decoded::Set(container) => select(&container, key_id)?.clone(),
        };
        tracing::info!(
            key = handle.describe(),
            kid = handle.kid().unwrap_or_default(),
            "resolved key material"
        );
        Ok(handle)
    }
}

/// Pick one key out of a key set. Never guesses between several keys.
pub fn select<'c>(container: &'c KeyContainer, key_id: &str) -> Result<&'c KeyHandle> {
    if !key_id.is_empty() {
        tracing::trace!(key_id, "looking up key in key set");
        return container
            .get(key_id)
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()));
    }
    let mut keys = container.iter();
    match (keys.next(), keys.next()) {
        (None, _) => Err(Error::EmptyKeySet),
        (Some(only), None) => Ok(only),
        (Some(_), Some(_)) => Err(Error::AmbiguousKeySet {
            kids: container.kids(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::KeyMaterial;
    use zeroize::Zeroizing;

    fn oct(kid: &str, byte: u8) -> KeyHandle {
        KeyHandle::new(KeyMaterial::Symmetric(Zeroizing::new(vec![byte; 16]))).with_kid(kid)
    }

    fn container(keys: &[KeyHandle]) -> KeyContainer {
        let mut set = KeyContainer::new();
        for key in keys {
            assert!(set.insert(key.clone()));
        }
        set
    }

    #[test]
    fn select_by_kid() {
        let set = container(&[oct("a", 1), oct("b", 2)]);
        assert_eq!(select(&set, "b").unwrap(), &oct("b", 2));
        assert!(matches!(select(&set, "c"), Err(Error::KeyNotFound(kid)) if kid == "c"));
    }

    #[test]
    fn empty_kid_needs_exactly_one_key() {
        assert!(matches!(select(&KeyContainer::new(), ""), Err(Error::EmptyKeySet)));
        let one = container(&[oct("a", 1)]);
        assert_eq!(select(&one, "").unwrap().kid(), Some("a"));
        let two = container(&[oct("a", 1), oct("b", 2)]);
        match select(&two, "") {
            Err(Error::AmbiguousKeySet { kids }) => assert_eq!(kids, ["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_jwk_kid_must_match_request() {
        let resolver = Resolver::new(crate::password::StaticPassword::new(""));
        let jwk = br#"{"kty":"oct","kid":"sym","k":"AQIDBA"}"#;
        assert!(resolver.resolve_key_pair(jwk, false, "sym").is_ok());
        assert!(resolver.resolve_key_pair(jwk, false, "").is_ok());
        assert!(matches!(
            resolver.resolve_key_pair(jwk, false, "other"),
            Err(Error::KeyNotFound(_))
        ));
    }
}
