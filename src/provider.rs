//! Cryptographic provider: JWS signing and JWE key management on top of the
//! RustCrypto crates.

use hmac::{Hmac, Mac};
use rand_core::OsRng;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::Value;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::aead;
use crate::alg::{ContentEncryption, KeyManagement, SignatureAlgorithm};
use crate::claims::ClaimSet;
use crate::handle::{EcPrivateKey, EcPublicKey, KeyHandle, KeyMaterial};
use crate::wire::{encode_header, token_from_parts, Header, JweParts, JwsParts, Token, WireError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{alg} cannot be used with a {key} key")]
    KeyMismatch { alg: &'static str, key: &'static str },

    #[error("{0}")]
    Crypto(String),

    #[error(transparent)]
    Malformed(#[from] WireError),
}

/// Signing and encryption primitives used by the envelope pipeline.
pub trait CryptoProvider: Send + Sync {
    /// Sign `claims` under `header`; `alg` (and `typ`) are filled in.
    fn sign(
        &self,
        claims: &ClaimSet,
        header: &Header,
        key: &KeyHandle,
        alg: SignatureAlgorithm,
    ) -> Result<JwsParts, ProviderError>;

    /// Check the signature of `token` with `key` and return its contents.
    fn verify(&self, token: &JwsParts, key: &KeyHandle) -> Result<Token, ProviderError>;

    /// Encrypt `plaintext` for `key`; `alg` and `enc` are added to `header`.
    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &KeyHandle,
        alg: KeyManagement,
        enc: ContentEncryption,
        header: &Header,
    ) -> Result<JweParts, ProviderError>;

    fn decrypt(&self, envelope: &JweParts, key: &KeyHandle) -> Result<Zeroizing<Vec<u8>>, ProviderError>;
}

/// Default provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoProvider;

impl CryptoProvider for RustCryptoProvider {
    fn sign(
        &self,
        claims: &ClaimSet,
        header: &Header,
        key: &KeyHandle,
        alg: SignatureAlgorithm,
    ) -> Result<JwsParts, ProviderError> {
        let mut full = Header::new();
        full.insert("alg".to_string(), Value::from(alg.as_str()));
        full.insert("typ".to_string(), Value::from("JWT"));
        for (name, value) in header {
            if name != "alg" {
                full.insert(name.clone(), value.clone());
            }
        }
        let payload =
            serde_json::to_vec(claims).map_err(|e| ProviderError::Crypto(format!("claims do not serialize: {e}")))?;
        let mut parts = JwsParts::new(&full, &payload)?;
        parts.signature = sign_bytes(alg, key, &parts.signing_input())?;
        Ok(parts)
    }

    fn verify(&self, token: &JwsParts, key: &KeyHandle) -> Result<Token, ProviderError> {
        let header = token.header()?;
        let alg: SignatureAlgorithm = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Crypto("token header has no alg".to_string()))?
            .parse()
            .map_err(|e| ProviderError::Unsupported(format!("{e}")))?;
        verify_bytes(alg, &key.to_public(), &token.signing_input(), &token.signature)?;
        Ok(token_from_parts(token)?)
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        key: &KeyHandle,
        alg: KeyManagement,
        enc: ContentEncryption,
        header: &Header,
    ) -> Result<JweParts, ProviderError> {
        let (cek, encrypted_key) = match (alg, key.to_public().material()) {
            (KeyManagement::Direct, KeyMaterial::Symmetric(k)) => {
                if k.len() != enc.key_len() {
                    return Err(ProviderError::Crypto(format!(
                        "{enc} needs a {}-byte key, the direct key has {} bytes",
                        enc.key_len(),
                        k.len()
                    )));
                }
                (k.clone(), Vec::new())
            }
            (KeyManagement::Direct, _) => return Err(mismatch(alg.as_str(), key)),
            (_, KeyMaterial::RsaPublic(public)) => {
                let cek = aead::cek(enc)?;
                let wrapped = wrap_key(alg, public, &cek)?;
                (cek, wrapped)
            }
            _ => return Err(mismatch(alg.as_str(), key)),
        };

        let mut full = Header::new();
        full.insert("alg".to_string(), Value::from(alg.as_str()));
        full.insert("enc".to_string(), Value::from(enc.as_str()));
        for (name, value) in header {
            if name != "alg" && name != "enc" {
                full.insert(name.clone(), value.clone());
            }
        }

        let mut parts = JweParts {
            protected: encode_header(&full)?,
            unprotected: None,
            encrypted_key,
            iv: Vec::new(),
            ciphertext: Vec::new(),
            tag: Vec::new(),
            aad: None,
        };
        let iv = aead::iv()?;
        let (ciphertext, tag) = aead::seal(enc, &cek, &iv, plaintext, &parts.aad_input())?;
        parts.iv = iv.to_vec();
        parts.ciphertext = ciphertext;
        parts.tag = tag;
        Ok(parts)
    }

    fn decrypt(&self, envelope: &JweParts, key: &KeyHandle) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
        let header = envelope.header()?;
        let param = |name: &str| {
            header
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Crypto(format!("envelope header has no {name}")))
        };
        let alg: KeyManagement = param("alg")?
            .parse()
            .map_err(|e| ProviderError::Unsupported(format!("{e}")))?;
        let enc: ContentEncryption = param("enc")?
            .parse()
            .map_err(|e| ProviderError::Unsupported(format!("{e}")))?;

        let cek = match (alg, key.material()) {
            (KeyManagement::Direct, KeyMaterial::Symmetric(k)) => {
                if !envelope.encrypted_key.is_empty() {
                    return Err(ProviderError::Crypto("dir envelope carries an encrypted key".to_string()));
                }
                k.clone()
            }
            (KeyManagement::Direct, _) => return Err(mismatch(alg.as_str(), key)),
            (_, KeyMaterial::RsaPrivate(private)) => unwrap_key(alg, private, &envelope.encrypted_key)?,
            _ => return Err(mismatch(alg.as_str(), key)),
        };
        if cek.len() != enc.key_len() {
            return Err(ProviderError::Crypto("content key has the wrong length".to_string()));
        }

        aead::open(
            enc,
            &cek,
            &envelope.iv,
            &envelope.ciphertext,
            &envelope.tag,
            &envelope.aad_input(),
        )
        .map(Zeroizing::new)
    }
}

fn mismatch(alg: &'static str, key: &KeyHandle) -> ProviderError {
    ProviderError::KeyMismatch {
        alg,
        key: key.describe(),
    }
}

fn crypto(e: impl core::fmt::Display) -> ProviderError {
    ProviderError::Crypto(e.to_string())
}

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

fn wrap_key(alg: KeyManagement, public: &RsaPublicKey, cek: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let mut rng = OsRng;
    match alg {
        KeyManagement::Rsa1_5 => public.encrypt(&mut rng, Pkcs1v15Encrypt, cek),
        KeyManagement::RsaOaep => public.encrypt(&mut rng, Oaep::new::<sha1::Sha1>(), cek),
        KeyManagement::RsaOaep256 => public.encrypt(&mut rng, Oaep::new::<Sha256>(), cek),
        KeyManagement::Direct => return Err(ProviderError::Unsupported("dir does not wrap keys".to_string())),
    }
    .map_err(crypto)
}

fn unwrap_key(
    alg: KeyManagement,
    private: &RsaPrivateKey,
    encrypted_key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, ProviderError> {
    match alg {
        KeyManagement::Rsa1_5 => private.decrypt(Pkcs1v15Encrypt, encrypted_key),
        KeyManagement::RsaOaep => private.decrypt(Oaep::new::<sha1::Sha1>(), encrypted_key),
        KeyManagement::RsaOaep256 => private.decrypt(Oaep::new::<Sha256>(), encrypted_key),
        KeyManagement::Direct => return Err(ProviderError::Unsupported("dir does not wrap keys".to_string())),
    }
    .map(Zeroizing::new)
    .map_err(|_| ProviderError::Crypto("content key does not unwrap".to_string()))
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

fn sign_bytes(alg: SignatureAlgorithm, key: &KeyHandle, input: &[u8]) -> Result<Vec<u8>, ProviderError> {
    use rsa::pkcs1v15::SigningKey as Pkcs1SigningKey;
    use rsa::pss::BlindedSigningKey;
    use SignatureAlgorithm::*;

    match (alg, key.material()) {
        (Rs256, KeyMaterial::RsaPrivate(k)) => rsa_sign(Pkcs1SigningKey::<Sha256>::new(k.clone()), input),
        (Rs384, KeyMaterial::RsaPrivate(k)) => rsa_sign(Pkcs1SigningKey::<Sha384>::new(k.clone()), input),
        (Rs512, KeyMaterial::RsaPrivate(k)) => rsa_sign(Pkcs1SigningKey::<Sha512>::new(k.clone()), input),
        (Ps256, KeyMaterial::RsaPrivate(k)) => pss_sign(BlindedSigningKey::<Sha256>::new(k.clone()), input),
        (Ps384, KeyMaterial::RsaPrivate(k)) => pss_sign(BlindedSigningKey::<Sha384>::new(k.clone()), input),
        (Ps512, KeyMaterial::RsaPrivate(k)) => pss_sign(BlindedSigningKey::<Sha512>::new(k.clone()), input),
        (Es256, KeyMaterial::EcPrivate(EcPrivateKey::P256(k))) => {
            let signing = p256::ecdsa::SigningKey::from(k);
            let signature: p256::ecdsa::Signature = signing.try_sign(input).map_err(crypto)?;
            Ok(signature.to_bytes().to_vec())
        }
        (Es384, KeyMaterial::EcPrivate(EcPrivateKey::P384(k))) => {
            let signing = p384::ecdsa::SigningKey::from(k);
            let signature: p384::ecdsa::Signature = signing.try_sign(input).map_err(crypto)?;
            Ok(signature.to_bytes().to_vec())
        }
        (Es512, KeyMaterial::EcPrivate(EcPrivateKey::P521(k))) => {
            let signing = p521::ecdsa::SigningKey::from_bytes(&k.to_bytes()).map_err(crypto)?;
            let signature: p521::ecdsa::Signature = signing.try_sign(input).map_err(crypto)?;
            Ok(signature.to_bytes().to_vec())
        }
        (Hs256, KeyMaterial::Symmetric(k)) => hmac_tag::<Hmac<Sha256>>(k, input),
        (Hs384, KeyMaterial::Symmetric(k)) => hmac_tag::<Hmac<Sha384>>(k, input),
        (Hs512, KeyMaterial::Symmetric(k)) => hmac_tag::<Hmac<Sha512>>(k, input),
        _ => Err(mismatch(alg.as_str(), key)),
    }
}

fn verify_bytes(
    alg: SignatureAlgorithm,
    key: &KeyHandle,
    input: &[u8],
    signature: &[u8],
) -> Result<(), ProviderError> {
    use rsa::pkcs1v15::VerifyingKey as Pkcs1VerifyingKey;
    use rsa::pss::VerifyingKey as PssVerifyingKey;
    use SignatureAlgorithm::*;

    let bad = |_| ProviderError::Crypto("signature does not verify".to_string());
    match (alg, key.material()) {
        (Rs256 | Rs384 | Rs512, KeyMaterial::RsaPublic(k)) => {
            let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(bad)?;
            match alg {
                Rs256 => Pkcs1VerifyingKey::<Sha256>::new(k.clone()).verify(input, &sig),
                Rs384 => Pkcs1VerifyingKey::<Sha384>::new(k.clone()).verify(input, &sig),
                _ => Pkcs1VerifyingKey::<Sha512>::new(k.clone()).verify(input, &sig),
            }
            .map_err(bad)
        }
        (Ps256 | Ps384 | Ps512, KeyMaterial::RsaPublic(k)) => {
            let sig = rsa::pss::Signature::try_from(signature).map_err(bad)?;
            match alg {
                Ps256 => PssVerifyingKey::<Sha256>::new(k.clone()).verify(input, &sig),
                Ps384 => PssVerifyingKey::<Sha384>::new(k.clone()).verify(input, &sig),
                _ => PssVerifyingKey::<Sha512>::new(k.clone()).verify(input, &sig),
            }
            .map_err(bad)
        }
        (Es256, KeyMaterial::EcPublic(EcPublicKey::P256(k))) => {
            let sig = p256::ecdsa::Signature::from_slice(signature).map_err(bad)?;
            p256::ecdsa::VerifyingKey::from(k).verify(input, &sig).map_err(bad)
        }
        (Es384, KeyMaterial::EcPublic(EcPublicKey::P384(k))) => {
            let sig = p384::ecdsa::Signature::from_slice(signature).map_err(bad)?;
            p384::ecdsa::VerifyingKey::from(k).verify(input, &sig).map_err(bad)
        }
        (Es512, KeyMaterial::EcPublic(EcPublicKey::P521(k))) => {
            let sig = p521::ecdsa::Signature::from_slice(signature).map_err(bad)?;
            let verifying = p521::ecdsa::VerifyingKey::from_affine(*k.as_affine()).map_err(bad)?;
            verifying.verify(input, &sig).map_err(bad)
        }
        (Hs256, KeyMaterial::Symmetric(k)) => hmac_check::<Hmac<Sha256>>(k, input, signature),
        (Hs384, KeyMaterial::Symmetric(k)) => hmac_check::<Hmac<Sha384>>(k, input, signature),
        (Hs512, KeyMaterial::Symmetric(k)) => hmac_check::<Hmac<Sha512>>(k, input, signature),
        _ => Err(mismatch(alg.as_str(), key)),
    }
}

fn rsa_sign<S: Signer<rsa::pkcs1v15::Signature>>(key: S, input: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let signature = key.try_sign(input).map_err(crypto)?;
    Ok(signature.to_vec())
}

fn pss_sign<S: RandomizedSigner<rsa::pss::Signature>>(key: S, input: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let signature = key.try_sign_with_rng(&mut OsRng, input).map_err(crypto)?;
    Ok(signature.to_vec())
}

fn hmac_tag<M: Mac + hmac::digest::KeyInit>(key: &[u8], input: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key).map_err(crypto)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_check<M: Mac + hmac::digest::KeyInit>(
    key: &[u8],
    input: &[u8],
    signature: &[u8],
) -> Result<(), ProviderError> {
    let expected = hmac_tag::<M>(key, input)?;
    if bool::from(expected.as_slice().ct_eq(signature)) {
        Ok(())
    } else {
        Err(ProviderError::Crypto("signature does not verify".to_string()))
    }
}
