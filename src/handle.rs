//! Typed key handles produced by the format decoder.

use core::fmt;

use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Which half of a key the caller asked for or the material provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Private,
    Public,
    Symmetric,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Private => "private",
            Self::Public => "public",
            Self::Symmetric => "symmetric",
        };
        f.write_str(name)
    }
}

/// Where the material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// PEM or DER encoded key, certificate or public key info.
    Encoded,
    /// JSON Web Key, alone or out of a key set.
    Jwk,
}

/// NIST curves usable with JWS `ES256`, `ES384` and `ES512`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    /// The JWK `crv` name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// Size in bytes of one affine coordinate or of the private scalar.
    pub fn field_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }

    pub fn from_jwk_name(name: &str) -> Option<Self> {
        match name {
            "P-256" => Some(Self::P256),
            "P-384" => Some(Self::P384),
            "P-521" => Some(Self::P521),
            _ => None,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An elliptic curve private key.
#[derive(Clone, PartialEq, Eq)]
pub enum EcPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

/// An elliptic curve public key.
#[derive(Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    P521(p521::PublicKey),
}

impl EcPrivateKey {
    pub fn curve(&self) -> Curve {
        match self {
            Self::P256(_) => Curve::P256,
            Self::P384(_) => Curve::P384,
            Self::P521(_) => Curve::P521,
        }
    }

    pub fn public_key(&self) -> EcPublicKey {
        match self {
            Self::P256(k) => EcPublicKey::P256(k.public_key()),
            Self::P384(k) => EcPublicKey::P384(k.public_key()),
            Self::P521(k) => EcPublicKey::P521(k.public_key()),
        }
    }

    /// Big-endian private scalar, `curve.field_len()` bytes.
    pub fn from_scalar(curve: Curve, d: &[u8]) -> Result<Self, String> {
        if d.len() != curve.field_len() {
            return Err(format!("{curve} private scalar must be {} bytes", curve.field_len()));
        }
        let key = match curve {
            Curve::P256 => p256::SecretKey::from_slice(d).map(Self::P256),
            Curve::P384 => p384::SecretKey::from_slice(d).map(Self::P384),
            Curve::P521 => p521::SecretKey::from_slice(d).map(Self::P521),
        };
        key.map_err(|_| format!("invalid {curve} private scalar"))
    }
}

impl EcPublicKey {
    pub fn curve(&self) -> Curve {
        match self {
            Self::P256(_) => Curve::P256,
            Self::P384(_) => Curve::P384,
            Self::P521(_) => Curve::P521,
        }
    }

    /// Affine coordinates as carried by a JWK, each `curve.field_len()` bytes.
    pub fn from_coordinates(curve: Curve, x: &[u8], y: &[u8]) -> Result<Self, String> {
        let len = curve.field_len();
        if x.len() != len || y.len() != len {
            return Err(format!("{curve} coordinates must be {len} bytes"));
        }
        let mut sec1 = Vec::with_capacity(1 + 2 * len);
        sec1.push(0x04);
        sec1.extend_from_slice(x);
        sec1.extend_from_slice(y);
        let key = match curve {
            Curve::P256 => p256::PublicKey::from_sec1_bytes(&sec1).map(Self::P256),
            Curve::P384 => p384::PublicKey::from_sec1_bytes(&sec1).map(Self::P384),
            Curve::P521 => p521::PublicKey::from_sec1_bytes(&sec1).map(Self::P521),
        };
        key.map_err(|_| format!("point is not on {curve}"))
    }
}

/// The key itself.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    RsaPrivate(RsaPrivateKey),
    RsaPublic(RsaPublicKey),
    EcPrivate(EcPrivateKey),
    EcPublic(EcPublicKey),
    Symmetric(Zeroizing<Vec<u8>>),
}

impl KeyMaterial {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::RsaPrivate(_) | Self::EcPrivate(_) => KeyKind::Private,
            Self::RsaPublic(_) | Self::EcPublic(_) => KeyKind::Public,
            Self::Symmetric(_) => KeyKind::Symmetric,
        }
    }

    /// Short human description, used in logs and error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::RsaPrivate(_) => "RSA private",
            Self::RsaPublic(_) => "RSA public",
            Self::EcPrivate(k) => match k.curve() {
                Curve::P256 => "P-256 private",
                Curve::P384 => "P-384 private",
                Curve::P521 => "P-521 private",
            },
            Self::EcPublic(k) => match k.curve() {
                Curve::P256 => "P-256 public",
                Curve::P384 => "P-384 public",
                Curve::P521 => "P-521 public",
            },
            Self::Symmetric(_) => "symmetric",
        }
    }
}

// Manual impl: never print key components.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaPrivate(k) => write!(f, "RsaPrivate({} bits)", k.size() * 8),
            Self::RsaPublic(k) => write!(f, "RsaPublic({} bits)", k.size() * 8),
            Self::EcPrivate(k) => write!(f, "EcPrivate({})", k.curve()),
            Self::EcPublic(k) => write!(f, "EcPublic({})", k.curve()),
            Self::Symmetric(k) => write!(f, "Symmetric({} bytes)", k.len()),
        }
    }
}

/// A decoded key with its optional key identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    material: KeyMaterial,
    kid: Option<String>,
    origin: KeyOrigin,
}

impl KeyHandle {
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            material,
            kid: None,
            origin: KeyOrigin::Encoded,
        }
    }

    /// Attach a key identifier. An empty string clears it.
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        let kid = kid.into();
        self.kid = if kid.is_empty() { None } else { Some(kid) };
        self
    }

    pub(crate) fn with_origin(mut self, origin: KeyOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn kind(&self) -> KeyKind {
        self.material.kind()
    }

    pub fn describe(&self) -> &'static str {
        self.material.describe()
    }

    /// The public half of this key, keeping kid and origin.
    ///
    /// Public handles return themselves. Symmetric keys have no separate
    /// public half and are returned as-is.
    pub fn to_public(&self) -> KeyHandle {
        let material = match &self.material {
            KeyMaterial::RsaPrivate(k) => KeyMaterial::RsaPublic(k.to_public_key()),
            KeyMaterial::EcPrivate(k) => KeyMaterial::EcPublic(k.public_key()),
            other => other.clone(),
        };
        KeyHandle {
            material,
            kid: self.kid.clone(),
            origin: self.origin,
        }
    }
}

/// A JSON Web Key Set: key identifiers unique, insertion order kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContainer {
    keys: Vec<KeyHandle>,
}

impl KeyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key. Returns `false` (and drops the key) when the identifier
    /// is already taken, or when the key would share the set with a key
    /// that has no identifier. An unnamed key is only valid on its own.
    pub fn insert(&mut self, handle: KeyHandle) -> bool {
        let clash = match handle.kid() {
            Some(kid) => self.get(kid).is_some() || self.has_unnamed(),
            None => !self.keys.is_empty(),
        };
        if clash {
            return false;
        }
        self.keys.push(handle);
        true
    }

    /// Whether the set holds a key without an identifier.
    pub fn has_unnamed(&self) -> bool {
        self.keys.iter().any(|k| k.kid().is_none())
    }

    pub fn get(&self, kid: &str) -> Option<&KeyHandle> {
        self.keys.iter().find(|k| k.kid() == Some(kid))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Identifiers in insertion order; keys without one show as `""`.
    pub fn kids(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| k.kid().unwrap_or_default().to_string())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyHandle> {
        self.keys.iter()
    }
}

/// Private and public halves resolved from one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private: Option<KeyHandle>,
    pub public: Option<KeyHandle>,
}

impl KeyPair {
    pub fn from_handle(handle: KeyHandle) -> Self {
        match handle.kind() {
            KeyKind::Private => Self {
                public: Some(handle.to_public()),
                private: Some(handle),
            },
            KeyKind::Public => Self {
                private: None,
                public: Some(handle),
            },
            KeyKind::Symmetric => Self {
                private: Some(handle.clone()),
                public: Some(handle),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oct(kid: &str) -> KeyHandle {
        KeyHandle::new(KeyMaterial::Symmetric(Zeroizing::new(vec![7u8; 16]))).with_kid(kid)
    }

    #[test]
    fn empty_kid_is_cleared() {
        assert_eq!(oct("").kid(), None);
        assert_eq!(oct("a").kid(), Some("a"));
    }

    #[test]
    fn container_rejects_duplicate_kid() {
        let mut set = KeyContainer::new();
        assert!(set.insert(oct("a")));
        assert!(!set.insert(oct("a")));
        assert!(set.insert(oct("b")));
        assert_eq!(set.kids(), vec!["a", "b"]);
    }

    #[test]
    fn unnamed_key_must_stand_alone() {
        let mut set = KeyContainer::new();
        assert!(set.insert(oct("")));
        assert!(!set.insert(oct("")));
        assert!(!set.insert(oct("a")));
        assert_eq!(set.len(), 1);

        let mut named = KeyContainer::new();
        assert!(named.insert(oct("a")));
        assert!(!named.insert(oct("")));
        assert!(!named.has_unnamed());
        assert_eq!(named.kids(), vec!["a"]);
    }

    #[test]
    fn symmetric_pair_serves_both_sides() {
        let pair = KeyPair::from_handle(oct("s"));
        assert_eq!(pair.private, pair.public);
    }

    #[test]
    fn curve_sizes_follow_jwk_names() {
        for (name, len) in [("P-256", 32), ("P-384", 48), ("P-521", 66)] {
            let curve = Curve::from_jwk_name(name).unwrap();
            assert_eq!(curve.as_str(), name);
            assert_eq!(curve.field_len(), len);
        }
        assert_eq!(Curve::from_jwk_name("secp256k1"), None);
    }

    #[test]
    fn ec_public_half_keeps_the_curve() {
        let d = [5u8; 48];
        let private = KeyHandle::new(KeyMaterial::EcPrivate(EcPrivateKey::from_scalar(Curve::P384, &d).unwrap()));
        let public = private.to_public();
        assert_eq!(public.describe(), "P-384 public");
        assert_eq!(format!("{:?}", public.material()), "EcPublic(P-384)");
        assert!(EcPrivateKey::from_scalar(Curve::P521, &d).is_err());
    }

    #[test]
    fn debug_hides_secret_bytes() {
        let rendered = format!("{:?}", oct("s"));
        assert!(rendered.contains("Symmetric(16 bytes)"));
        assert!(!rendered.contains("7, 7"));
    }
}
