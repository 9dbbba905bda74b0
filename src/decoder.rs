//! Key format decoder: an ordered chain of format parsers.
//!
//! The first step unwraps a PEM container (decrypting it if needed); every
//! later step gets the DER payload, or the raw bytes when there was no PEM
//! block. The first decoder to succeed wins.

use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::der::{Decode, Encode};

use crate::armor;
use crate::error::{DecodeAttempt, Error, Result};
use crate::handle::{EcPrivateKey, EcPublicKey, KeyContainer, KeyHandle, KeyKind, KeyMaterial};
use crate::jwk::{Jwk, JwkSet};
use crate::password::{PasswordGate, PasswordSource};

/// Names of the decoding steps, in the order they are tried.
pub const DECODER_ORDER: [&str; 8] = ["pem", "pkcs1", "pkcs8", "ec", "x509", "pkix", "jwk", "jwks"];

/// What a decoder sees.
#[derive(Debug, Clone, Copy)]
pub struct DecodeInput<'a> {
    /// Bytes as supplied by the caller.
    pub raw: &'a [u8],
    /// PEM payload if a block was found, otherwise `raw`.
    pub der: &'a [u8],
    /// PEM label, e.g. `RSA PRIVATE KEY`.
    pub label: Option<&'a str>,
}

/// A decoded blob: one key, or a key set still awaiting kid selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Single(KeyHandle),
    Set(KeyContainer),
}

/// One format in the chain. A rejection is reported as a short reason.
pub trait KeyDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String>;
}

struct Pkcs1;
struct Pkcs8;
struct Sec1;
struct Certificate;
struct Pkix;
struct SingleJwk;
struct JwkSetDecoder;

static DECODERS: &[&dyn KeyDecoder] = &[
    &Pkcs1,
    &Pkcs8,
    &Sec1,
    &Certificate,
    &Pkix,
    &SingleJwk,
    &JwkSetDecoder,
];

fn single(material: KeyMaterial) -> Decoded {
    Decoded::Single(KeyHandle::new(material))
}

impl KeyDecoder for Pkcs1 {
    fn name(&self) -> &'static str {
        "pkcs1"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        let key = RsaPrivateKey::from_pkcs1_der(input.der).map_err(|e| e.to_string())?;
        Ok(single(KeyMaterial::RsaPrivate(key)))
    }
}

impl KeyDecoder for Pkcs8 {
    fn name(&self) -> &'static str {
        "pkcs8"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        match RsaPrivateKey::from_pkcs8_der(input.der) {
            Ok(key) => Ok(single(KeyMaterial::RsaPrivate(key))),
            Err(rsa_err) => match ec_pkcs8(input.der) {
                Ok(key) => Ok(single(KeyMaterial::EcPrivate(key))),
                Err(ec_err) => Err(format!("not RSA ({rsa_err}), not EC ({ec_err})")),
            },
        }
    }
}

impl KeyDecoder for Sec1 {
    fn name(&self) -> &'static str {
        "ec"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        let key = p256::SecretKey::from_sec1_der(input.der)
            .map(EcPrivateKey::P256)
            .or_else(|_| p384::SecretKey::from_sec1_der(input.der).map(EcPrivateKey::P384))
            .or_else(|_| p521::SecretKey::from_sec1_der(input.der).map(EcPrivateKey::P521))
            .map_err(|e| e.to_string())?;
        Ok(single(KeyMaterial::EcPrivate(key)))
    }
}

impl KeyDecoder for Certificate {
    fn name(&self) -> &'static str {
        "x509"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        let cert = x509_cert::Certificate::from_der(input.der).map_err(|e| e.to_string())?;
        let spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| e.to_string())?;
        public_key_info(&spki).map_err(|e| format!("certificate key: {e}"))
    }
}

impl KeyDecoder for Pkix {
    fn name(&self) -> &'static str {
        "pkix"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        public_key_info(input.der).or_else(|spki_err| {
            RsaPublicKey::from_pkcs1_der(input.der)
                .map(|key| single(KeyMaterial::RsaPublic(key)))
                .map_err(|_| spki_err)
        })
    }
}

fn public_key_info(der: &[u8]) -> core::result::Result<Decoded, String> {
    match RsaPublicKey::from_public_key_der(der) {
        Ok(key) => Ok(single(KeyMaterial::RsaPublic(key))),
        Err(rsa_err) => match ec_public_key_info(der) {
            Ok(key) => Ok(single(KeyMaterial::EcPublic(key))),
            Err(ec_err) => Err(format!("not RSA ({rsa_err}), not EC ({ec_err})")),
        },
    }
}

// The curve OID inside the structure picks the curve; the last error is
// reported when none matches.
fn ec_pkcs8(der: &[u8]) -> pkcs8::Result<EcPrivateKey> {
    p256::SecretKey::from_pkcs8_der(der)
        .map(EcPrivateKey::P256)
        .or_else(|_| p384::SecretKey::from_pkcs8_der(der).map(EcPrivateKey::P384))
        .or_else(|_| p521::SecretKey::from_pkcs8_der(der).map(EcPrivateKey::P521))
}

fn ec_public_key_info(der: &[u8]) -> pkcs8::spki::Result<EcPublicKey> {
    p256::PublicKey::from_public_key_der(der)
        .map(EcPublicKey::P256)
        .or_else(|_| p384::PublicKey::from_public_key_der(der).map(EcPublicKey::P384))
        .or_else(|_| p521::PublicKey::from_public_key_der(der).map(EcPublicKey::P521))
}

impl KeyDecoder for SingleJwk {
    fn name(&self) -> &'static str {
        "jwk"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        let jwk = Jwk::parse(input.raw)?;
        jwk.to_handle().map(Decoded::Single)
    }
}

impl KeyDecoder for JwkSetDecoder {
    fn name(&self) -> &'static str {
        "jwks"
    }

    fn decode(&self, input: &DecodeInput<'_>) -> core::result::Result<Decoded, String> {
        let set = JwkSet::parse(input.raw)?;
        let mut container = KeyContainer::new();
        for jwk in &set.keys {
            let kid = jwk.kid.as_deref().unwrap_or_default();
            let handle = match jwk.to_handle() {
                Ok(handle) => handle,
                Err(reason) => {
                    tracing::warn!(kid, %reason, "skipping invalid key in key set");
                    continue;
                }
            };
            let unnamed = handle.kid().is_none() || container.has_unnamed();
            if !container.insert(handle) {
                return Err(if unnamed {
                    "a key without kid must be the only key in the set".to_string()
                } else {
                    format!("key id {kid:?} appears more than once")
                });
            }
        }
        Ok(Decoded::Set(container))
    }
}

/// Runs the decoder chain over one blob.
pub struct Decoder<'a> {
    password: &'a dyn PasswordSource,
    allow_prompt: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(password: &'a dyn PasswordSource, allow_prompt: bool) -> Self {
        Self {
            password,
            allow_prompt,
        }
    }

    /// Try every format in [`DECODER_ORDER`]; the first success wins.
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded> {
        let mut gate = PasswordGate::new(self.password, self.allow_prompt);
        let mut attempts = Vec::with_capacity(DECODER_ORDER.len());

        let unwrapped = armor::unwrap(bytes, &mut gate)?;
        if unwrapped.is_none() {
            attempts.push(DecodeAttempt {
                decoder: "pem",
                reason: "no PEM block".to_string(),
            });
        }
        let input = DecodeInput {
            raw: bytes,
            der: unwrapped.as_ref().map(|u| u.der.as_slice()).unwrap_or(bytes),
            label: unwrapped.as_ref().map(|u| u.label.as_str()),
        };

        for decoder in DECODERS {
            match decoder.decode(&input) {
                Ok(decoded) => {
                    tracing::debug!(decoder = decoder.name(), label = ?input.label, "key material decoded");
                    return Ok(decoded);
                }
                Err(reason) => {
                    tracing::trace!(decoder = decoder.name(), %reason, "decoder rejected input");
                    attempts.push(DecodeAttempt {
                        decoder: decoder.name(),
                        reason,
                    });
                }
            }
        }

        // A legacy block can unpad cleanly under a wrong password and still
        // hold garbage.
        if unwrapped.as_ref().is_some_and(|u| u.decrypted) {
            return Err(Error::KeyDecryptionFailed(
                "decrypted block is not a key, the password is probably wrong".to_string(),
            ));
        }
        Err(Error::UnrecognizedKeyFormat { attempts })
    }
}

/// Apply the requested kind to a decoded handle.
///
/// A public request on a private key yields the derived public half. A
/// private request on a public-only key fails. Symmetric keys satisfy both.
pub fn check_kind(handle: KeyHandle, want: KeyKind) -> Result<KeyHandle> {
    let found = handle.kind();
    match (want, found) {
        (_, KeyKind::Symmetric) => Ok(handle),
        (KeyKind::Public, KeyKind::Private) => Ok(handle.to_public()),
        (KeyKind::Private, KeyKind::Public) | (KeyKind::Symmetric, _) => {
            Err(Error::KeyKindMismatch { wanted: want, found })
        }
        _ => Ok(handle),
    }
}
