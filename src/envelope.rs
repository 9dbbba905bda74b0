//! Envelope pipeline: sign-then-encrypt and decrypt-then-verify.

use serde_json::Value;

use crate::alg::{ContentEncryption, KeyManagement, SerializationMode, SignatureAlgorithm};
use crate::claims::{check_validity, parse_claims, ClaimsAugmenter};
use crate::config::PipelineConfig;
use crate::error::{AuthenticityWarning, Error, PipelineStep, Result};
use crate::handle::KeyHandle;
use crate::provider::{CryptoProvider, RustCryptoProvider};
use crate::wire::{decode_unverified, token_from_parts, Header, JweParts, JwsParts, Token};

/// Default token lifetime requested by [`SignOptions::default`].
pub const DEFAULT_DURATION: &str = "1h";

/// Signing side of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOptions {
    pub algorithm: SignatureAlgorithm,
    /// Signing key. Without one, signing is skipped.
    pub private_key: Option<KeyHandle>,
    /// Verification key. Without one, verification is skipped.
    pub public_key: Option<KeyHandle>,
    /// Placed in the token header as `kid`; also checked on verification.
    pub key_id: String,
    pub duration: String,
    pub serialization: SerializationMode,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::default(),
            private_key: None,
            public_key: None,
            key_id: String::new(),
            duration: DEFAULT_DURATION.to_string(),
            serialization: SerializationMode::Compact,
        }
    }
}

/// Encryption side of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    pub algorithm: KeyManagement,
    pub content_encoding: ContentEncryption,
    /// Decryption key.
    pub private_key: Option<KeyHandle>,
    /// Recipient key.
    pub public_key: Option<KeyHandle>,
    pub serialization: SerializationMode,
}

/// A signed token in structured and serialized form.
#[derive(Debug, Clone, PartialEq)]
pub struct Signed {
    pub token: Token,
    pub serialized: String,
    /// Non-fatal issues raised while building the claims.
    pub warnings: Vec<String>,
}

/// Result of [`Pipeline::sign_then_encrypt`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sealed {
    pub envelope: String,
    /// The token that was encrypted, when signing took place.
    pub signed: Option<Signed>,
}

/// How far a token could be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trust {
    /// Signature and validity window checked out.
    Verified,
    /// Verification was attempted and failed.
    Unverified(AuthenticityWarning),
    /// No verification key was supplied.
    NotChecked,
}

impl Trust {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn warning(&self) -> Option<&AuthenticityWarning> {
        match self {
            Self::Unverified(warning) => Some(warning),
            _ => None,
        }
    }
}

/// Result of [`Pipeline::decrypt_then_verify`].
#[derive(Debug, Clone, PartialEq)]
pub struct Opened {
    pub plaintext: Vec<u8>,
    /// Merged JWE header.
    pub header: Header,
    /// The inner token, when the plaintext is one.
    pub token: Option<Token>,
    pub trust: Trust,
}

/// Result of [`Pipeline::verify`].
#[derive(Debug, Clone, PartialEq)]
pub struct Checked {
    pub token: Token,
    pub trust: Trust,
}

/// Composes claim augmentation, signing and encryption.
#[derive(Debug, Clone, Default)]
pub struct Pipeline<P = RustCryptoProvider> {
    provider: P,
    config: PipelineConfig,
}

impl Pipeline<RustCryptoProvider> {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_provider(RustCryptoProvider, config)
    }
}

impl<P: CryptoProvider> Pipeline<P> {
    pub fn with_provider(provider: P, config: PipelineConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Augment the claims in `payload` and sign them.
    pub fn sign(&self, payload: &[u8], opts: &SignOptions) -> Result<Signed> {
        tracing::debug!(
            alg = %opts.algorithm,
            kid = %opts.key_id,
            duration = %opts.duration,
            serialization = %opts.serialization,
            "signing"
        );
        let key = opts
            .private_key
            .as_ref()
            .ok_or_else(|| Error::construction(PipelineStep::Sign, "no signing key"))?;

        let claims = parse_claims(payload).map_err(|e| Error::construction(PipelineStep::Claims, e))?;
        let augmented = ClaimsAugmenter::new(self.config.clock(), self.config.default_duration).augment(
            claims,
            &opts.duration,
            &opts.key_id,
        );

        let mut header = Header::new();
        if let Some(kid) = &augmented.kid {
            header.insert("kid".to_string(), Value::from(kid.as_str()));
        }
        let jws = self
            .provider
            .sign(&augmented.claims, &header, key, opts.algorithm)
            .map_err(|e| Error::construction(PipelineStep::Sign, e))?;
        let serialized = jws
            .encode(opts.serialization)
            .map_err(|e| Error::construction(PipelineStep::Serialize, e))?;
        let header = jws
            .header()
            .map_err(|e| Error::construction(PipelineStep::Serialize, e))?;

        tracing::info!(alg = %opts.algorithm, exp = augmented.expires_at, "signed token");
        Ok(Signed {
            token: Token {
                header,
                claims: augmented.claims,
            },
            serialized,
            warnings: augmented.warnings,
        })
    }

    /// Check a serialized token. A bad signature, a kid that does not match
    /// `opts.key_id`, or an expired token is a warning, not an error.
    pub fn verify(&self, token: &str, opts: &SignOptions) -> Result<Checked> {
        tracing::debug!(alg = %opts.algorithm, kid = %opts.key_id, "verifying");
        let parts = JwsParts::decode(token).map_err(|e| Error::EnvelopeParse(e.to_string()))?;
        let trust = match &opts.public_key {
            Some(key) => self.authenticate(&parts, key, &opts.key_id),
            None => Trust::NotChecked,
        };
        let token = token_from_parts(&parts).map_err(|e| Error::EnvelopeParse(e.to_string()))?;
        Ok(Checked { token, trust })
    }

    pub fn sign_then_encrypt(&self, payload: &[u8], sign: &SignOptions, encode: &EncodeOptions) -> Result<Sealed> {
        tracing::debug!(
            alg = %encode.algorithm,
            enc = %encode.content_encoding,
            serialization = %encode.serialization,
            "encrypting"
        );
        let signed = match sign.private_key {
            Some(_) => Some(self.sign(payload, sign)?),
            None => None,
        };
        let content = signed.as_ref().map(|s| s.serialized.as_bytes()).unwrap_or(payload);

        let recipient = encode
            .public_key
            .as_ref()
            .or(encode.private_key.as_ref())
            .ok_or_else(|| Error::construction(PipelineStep::Encrypt, "no encryption key"))?;

        let mut header = Header::new();
        if signed.is_some() {
            header.insert("cty".to_string(), Value::from("JWT"));
        }
        if let Some(kid) = recipient.kid() {
            header.insert("kid".to_string(), Value::from(kid));
        }

        let jwe = self
            .provider
            .encrypt(content, recipient, encode.algorithm, encode.content_encoding, &header)
            .map_err(|e| Error::construction(PipelineStep::Encrypt, e))?;
        let envelope = jwe
            .encode(encode.serialization)
            .map_err(|e| Error::construction(PipelineStep::Serialize, e))?;

        tracing::info!(signed = signed.is_some(), "envelope encrypted");
        Ok(Sealed { envelope, signed })
    }

    pub fn decrypt_then_verify(&self, envelope: &str, encode: &EncodeOptions, sign: &SignOptions) -> Result<Opened> {
        let parts = JweParts::decode(envelope).map_err(|e| Error::EnvelopeParse(e.to_string()))?;
        let header = parts.header().map_err(|e| Error::EnvelopeParse(e.to_string()))?;
        tracing::debug!(
            alg = header.get("alg").and_then(serde_json::Value::as_str).unwrap_or_default(),
            enc = header.get("enc").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "decrypting"
        );

        let key = encode
            .private_key
            .as_ref()
            .ok_or_else(|| Error::DecryptionFailed("no decryption key".to_string()))?;
        let plaintext = self
            .provider
            .decrypt(&parts, key)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?
            .to_vec();
        tracing::info!(bytes = plaintext.len(), "envelope decrypted");

        let inner = core::str::from_utf8(&plaintext)
            .ok()
            .and_then(|text| JwsParts::decode(text).ok());
        let (token, trust) = match (&sign.public_key, inner) {
            (Some(key), Some(parts)) => {
                let trust = self.authenticate(&parts, key, &sign.key_id);
                (token_from_parts(&parts).ok(), trust)
            }
            (Some(_), None) => {
                let warning = AuthenticityWarning::new("payload is not a signed token");
                tracing::warn!(reason = %warning.reason, "token verification failed");
                (None, Trust::Unverified(warning))
            }
            (None, Some(parts)) => (token_from_parts(&parts).ok(), Trust::NotChecked),
            (None, None) => (None, Trust::NotChecked),
        };

        Ok(Opened {
            plaintext,
            header,
            token,
            trust,
        })
    }

    fn authenticate(&self, parts: &JwsParts, key: &KeyHandle, key_id: &str) -> Trust {
        let outcome = self.provider.verify(parts, key).map_err(|e| e.to_string()).and_then(|token| {
            match token.kid() {
                Some(kid) if !key_id.is_empty() && kid != key_id => {
                    return Err(format!("token kid {kid:?} does not match {key_id:?}"));
                }
                _ => {}
            }
            check_validity(&token.claims, self.config.clock().now(), self.config.leeway)
        });
        match outcome {
            Ok(()) => {
                tracing::info!("token verified");
                Trust::Verified
            }
            Err(reason) => {
                tracing::warn!(%reason, "token verification failed");
                Trust::Unverified(AuthenticityWarning::new(reason))
            }
        }
    }
}

/// Read a token's header and claims without any verification.
pub fn inspect(token: &str) -> Result<Token> {
    decode_unverified(token).map_err(|e| Error::EnvelopeParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::FixedClock;
    use crate::handle::KeyMaterial;
    use zeroize::Zeroizing;

    const NOW: i64 = 1_700_000_000;

    fn oct(byte: u8, kid: &str) -> KeyHandle {
        KeyHandle::new(KeyMaterial::Symmetric(Zeroizing::new(vec![byte; 16]))).with_kid(kid)
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default().with_clock(FixedClock::at_unix(NOW)))
    }

    fn hs256(key: KeyHandle) -> SignOptions {
        SignOptions {
            algorithm: SignatureAlgorithm::Hs256,
            private_key: Some(key.clone()),
            public_key: Some(key),
            key_id: "k1".to_string(),
            ..SignOptions::default()
        }
    }

    fn direct(key: KeyHandle) -> EncodeOptions {
        EncodeOptions {
            algorithm: KeyManagement::Direct,
            private_key: Some(key.clone()),
            public_key: Some(key),
            ..EncodeOptions::default()
        }
    }

    #[test]
    fn signed_envelope_round_trip() {
        let sign = hs256(oct(1, ""));
        let encode = direct(oct(2, "enc-key"));
        let sealed = pipeline()
            .sign_then_encrypt(br#"{"role":"admin"}"#, &sign, &encode)
            .unwrap();
        let signed = sealed.signed.as_ref().unwrap();
        assert_eq!(signed.token.header["kid"], "k1");

        let jwe = JweParts::decode(&sealed.envelope).unwrap();
        let header = jwe.protected_header().unwrap();
        assert_eq!(header["cty"], "JWT");
        assert_eq!(header["kid"], "enc-key");

        let opened = pipeline().decrypt_then_verify(&sealed.envelope, &encode, &sign).unwrap();
        assert_eq!(opened.trust, Trust::Verified);
        assert_eq!(opened.plaintext, signed.serialized.as_bytes());
        let token = opened.token.unwrap();
        assert_eq!(token.claims["role"], "admin");
        assert_eq!(token.claims["exp"], NOW + 3600);
    }

    #[test]
    fn unsigned_payload_is_reproduced_exactly() {
        let encode = direct(oct(2, ""));
        let payload = b"not json at all \x00\xff";
        let sealed = pipeline()
            .sign_then_encrypt(payload, &SignOptions::default(), &encode)
            .unwrap();
        assert!(sealed.signed.is_none());
        let header = JweParts::decode(&sealed.envelope).unwrap().protected_header().unwrap();
        assert!(!header.contains_key("cty"));

        let opened = pipeline()
            .decrypt_then_verify(&sealed.envelope, &encode, &SignOptions::default())
            .unwrap();
        assert_eq!(opened.plaintext, payload);
        assert_eq!(opened.trust, Trust::NotChecked);
        assert!(opened.token.is_none());
    }

    #[test]
    fn wrong_verification_key_warns() {
        let sign = hs256(oct(1, ""));
        let encode = direct(oct(2, ""));
        let sealed = pipeline().sign_then_encrypt(b"{}", &sign, &encode).unwrap();
        let other = SignOptions {
            public_key: Some(oct(9, "")),
            ..sign
        };
        let opened = pipeline().decrypt_then_verify(&sealed.envelope, &encode, &other).unwrap();
        assert!(opened.trust.warning().is_some());
        assert!(opened.token.is_some());
    }

    #[test]
    fn mismatched_kid_warns() {
        let sign = hs256(oct(1, ""));
        let signed = pipeline().sign(b"{}", &sign).unwrap();
        let other = SignOptions {
            key_id: "k2".to_string(),
            ..sign
        };
        let checked = pipeline().verify(&signed.serialized, &other).unwrap();
        assert!(checked.trust.warning().unwrap().reason.contains("k2"));
    }

    #[test]
    fn expired_token_warns() {
        let sign = SignOptions {
            duration: "-1m".to_string(),
            ..hs256(oct(1, ""))
        };
        let signed = pipeline().sign(b"{}", &sign).unwrap();
        let checked = pipeline().verify(&signed.serialized, &sign).unwrap();
        assert!(checked.trust.warning().unwrap().reason.contains("expired"));
    }

    #[test]
    fn leeway_tolerates_recent_expiry() {
        let sign = SignOptions {
            duration: "-1m".to_string(),
            ..hs256(oct(1, ""))
        };
        let signed = pipeline().sign(b"{}", &sign).unwrap();
        let lenient = Pipeline::new(
            PipelineConfig::default()
                .with_clock(FixedClock::at_unix(NOW))
                .with_leeway(chrono::Duration::minutes(2)),
        );
        assert_eq!(lenient.verify(&signed.serialized, &sign).unwrap().trust, Trust::Verified);
    }

    #[test]
    fn invalid_duration_uses_configured_default() {
        let short = Pipeline::new(
            PipelineConfig::default()
                .with_clock(FixedClock::at_unix(NOW))
                .with_default_duration(chrono::Duration::minutes(10)),
        );
        let sign = SignOptions {
            duration: "soon".to_string(),
            ..hs256(oct(1, ""))
        };
        let signed = short.sign(b"{}", &sign).unwrap();
        assert_eq!(signed.warnings.len(), 1);
        assert_eq!(signed.token.claims["exp"], NOW + 600);
    }

    #[test]
    fn inspect_skips_verification() {
        let signed = pipeline().sign(br#"{"sub":"dave"}"#, &hs256(oct(1, ""))).unwrap();
        let token = inspect(&signed.serialized).unwrap();
        assert_eq!(token.header["alg"], "HS256");
        assert_eq!(token.kid(), Some("k1"));
        assert_eq!(token.claims["sub"], "dave");

        assert!(matches!(inspect("not.a.token.at.all"), Err(Error::EnvelopeParse(_))));
    }

    #[test]
    fn non_object_claims_fail_at_claims_step() {
        let err = pipeline()
            .sign_then_encrypt(b"[1]", &hs256(oct(1, "")), &direct(oct(2, "")))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EnvelopeConstructionFailed {
                step: PipelineStep::Claims,
                ..
            }
        ));
    }

    #[test]
    fn missing_keys_are_reported() {
        let err = pipeline()
            .sign_then_encrypt(b"{}", &SignOptions::default(), &EncodeOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EnvelopeConstructionFailed {
                step: PipelineStep::Encrypt,
                ..
            }
        ));
        let err = pipeline()
            .decrypt_then_verify("a.b.c.d.e", &EncodeOptions::default(), &SignOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::EnvelopeParse(_)));
    }
}
