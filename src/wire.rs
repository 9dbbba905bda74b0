//! JOSE wire formats.
//!
//! JWE compact (RFC 7516 §7.1):
//!   BASE64URL(protected) . BASE64URL(encrypted_key) . BASE64URL(iv)
//!   . BASE64URL(ciphertext) . BASE64URL(tag)
//!
//! JWS compact (RFC 7515 §7.1):
//!   BASE64URL(protected) . BASE64URL(payload) . BASE64URL(signature)
//!
//! The full serialization is the flattened JSON form. On input the general
//! JSON form is accepted too, provided it carries exactly one recipient or
//! signature.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::alg::SerializationMode;
use crate::claims::{parse_claims, ClaimSet};

/// JOSE header as a JSON object.
pub type Header = Map<String, Value>;

pub const JWE_COMPACT_PARTS: usize = 5;
pub const JWS_COMPACT_PARTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WireError(pub String);

impl WireError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub(crate) fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn unb64(value: &str, what: &str) -> Result<Vec<u8>, WireError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| WireError(format!("{what} is not base64url: {e}")))
}

/// Serialize `header` and base64url it, ready for the protected slot.
pub(crate) fn encode_header(header: &Header) -> Result<String, WireError> {
    serde_json::to_vec(header)
        .map(|json| b64(&json))
        .map_err(|e| WireError(format!("header does not serialize: {e}")))
}

fn decode_header(protected: &str) -> Result<Header, WireError> {
    if protected.is_empty() {
        return Ok(Header::new());
    }
    let json = unb64(protected, "protected header")?;
    serde_json::from_slice(&json).map_err(|e| WireError(format!("protected header is not a JSON object: {e}")))
}

/// Later headers never override earlier ones; a repeated name is an error.
fn merge_headers<'a>(parts: impl IntoIterator<Item = &'a Header>) -> Result<Header, WireError> {
    let mut merged = Header::new();
    for part in parts {
        for (name, value) in part {
            if merged.contains_key(name) {
                return Err(WireError(format!("header parameter {name:?} appears more than once")));
            }
            merged.insert(name.clone(), value.clone());
        }
    }
    Ok(merged)
}

fn looks_like_json(input: &str) -> bool {
    input.starts_with('{')
}

fn split_compact<'a>(input: &'a str, expected: usize, what: &str) -> Result<Vec<&'a str>, WireError> {
    let parts: Vec<&str> = input.split('.').collect();
    if parts.len() != expected {
        return Err(WireError(format!(
            "{what} compact serialization needs {expected} parts, found {}",
            parts.len()
        )));
    }
    Ok(parts)
}

// ---------------------------------------------------------------------------
// JWE
// ---------------------------------------------------------------------------

/// Parsed JWE with every binary member decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JweParts {
    /// Protected header exactly as it appears on the wire (base64url).
    pub protected: String,
    /// Shared and per-recipient unprotected headers, JSON form only.
    pub unprotected: Option<Header>,
    pub encrypted_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
    /// Additional authenticated data (base64url), JSON form only.
    pub aad: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JsonJwe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unprotected: Option<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header: Option<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encrypted_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipients: Option<Vec<JsonRecipient>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JsonRecipient {
    #[serde(default)]
    header: Option<Header>,
    #[serde(default)]
    encrypted_key: Option<String>,
}

impl JweParts {
    /// The integrity-protected header alone.
    pub fn protected_header(&self) -> Result<Header, WireError> {
        decode_header(&self.protected)
    }

    /// Protected and unprotected headers merged into one view.
    pub fn header(&self) -> Result<Header, WireError> {
        let protected = self.protected_header()?;
        match &self.unprotected {
            Some(unprotected) => merge_headers([&protected, unprotected]),
            None => Ok(protected),
        }
    }

    /// Bytes fed to the AEAD as associated data.
    pub fn aad_input(&self) -> Vec<u8> {
        match &self.aad {
            Some(aad) => format!("{}.{}", self.protected, aad).into_bytes(),
            None => self.protected.as_bytes().to_vec(),
        }
    }

    pub fn encode(&self, mode: SerializationMode) -> Result<String, WireError> {
        match mode {
            SerializationMode::Compact => self.encode_compact(),
            SerializationMode::Full => self.encode_full(),
        }
    }

    pub fn encode_compact(&self) -> Result<String, WireError> {
        if self.unprotected.is_some() || self.aad.is_some() {
            return Err(WireError::new(
                "compact serialization cannot carry unprotected headers or aad",
            ));
        }
        Ok([
            self.protected.clone(),
            b64(&self.encrypted_key),
            b64(&self.iv),
            b64(&self.ciphertext),
            b64(&self.tag),
        ]
        .join("."))
    }

    pub fn encode_full(&self) -> Result<String, WireError> {
        let json = JsonJwe {
            protected: Some(self.protected.clone()),
            unprotected: self.unprotected.clone(),
            header: None,
            encrypted_key: (!self.encrypted_key.is_empty()).then(|| b64(&self.encrypted_key)),
            recipients: None,
            aad: self.aad.clone(),
            iv: Some(b64(&self.iv)),
            ciphertext: b64(&self.ciphertext),
            tag: Some(b64(&self.tag)),
        };
        serde_json::to_string(&json).map_err(|e| WireError(format!("envelope does not serialize: {e}")))
    }

    /// Parse either serialization; the form is detected from the input.
    pub fn decode(input: &str) -> Result<Self, WireError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(WireError::new("envelope is empty"));
        }
        if looks_like_json(input) {
            Self::decode_json(input)
        } else {
            Self::decode_compact(input)
        }
    }

    fn decode_compact(input: &str) -> Result<Self, WireError> {
        let parts = split_compact(input, JWE_COMPACT_PARTS, "JWE")?;
        if parts[0].is_empty() {
            return Err(WireError::new("JWE protected header is missing"));
        }
        let parsed = Self {
            protected: parts[0].to_string(),
            unprotected: None,
            encrypted_key: unb64(parts[1], "encrypted key")?,
            iv: unb64(parts[2], "iv")?,
            ciphertext: unb64(parts[3], "ciphertext")?,
            tag: unb64(parts[4], "tag")?,
            aad: None,
        };
        parsed.protected_header()?;
        Ok(parsed)
    }

    fn decode_json(input: &str) -> Result<Self, WireError> {
        let json: JsonJwe =
            serde_json::from_str(input).map_err(|e| WireError(format!("JWE JSON is malformed: {e}")))?;

        let (recipient_header, encrypted_key) = match json.recipients {
            Some(mut recipients) => {
                if recipients.len() != 1 {
                    return Err(WireError(format!(
                        "JWE must have exactly one recipient, found {}",
                        recipients.len()
                    )));
                }
                let only = recipients.remove(0);
                (only.header, only.encrypted_key)
            }
            None => (json.header, json.encrypted_key),
        };

        let unprotected = match (json.unprotected, recipient_header) {
            (None, None) => None,
            (Some(shared), None) => Some(shared),
            (None, Some(recipient)) => Some(recipient),
            (Some(shared), Some(recipient)) => Some(merge_headers([&shared, &recipient])?),
        };

        let parsed = Self {
            protected: json.protected.unwrap_or_default(),
            unprotected,
            encrypted_key: match encrypted_key {
                Some(key) => unb64(&key, "encrypted key")?,
                None => Vec::new(),
            },
            iv: unb64(json.iv.as_deref().unwrap_or_default(), "iv")?,
            ciphertext: unb64(&json.ciphertext, "ciphertext")?,
            tag: unb64(json.tag.as_deref().unwrap_or_default(), "tag")?,
            aad: json.aad,
        };
        parsed.header()?;
        Ok(parsed)
    }
}

// ---------------------------------------------------------------------------
// JWS
// ---------------------------------------------------------------------------

/// Parsed JWS. The payload stays base64url so the signing input can be
/// rebuilt byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwsParts {
    pub protected: String,
    pub unprotected: Option<Header>,
    pub payload: String,
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct JsonJws {
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header: Option<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signatures: Option<Vec<JsonSignature>>,
}

#[derive(Serialize, Deserialize)]
struct JsonSignature {
    #[serde(default)]
    protected: Option<String>,
    #[serde(default)]
    header: Option<Header>,
    signature: String,
}

impl JwsParts {
    pub fn new(header: &Header, payload: &[u8]) -> Result<Self, WireError> {
        Ok(Self {
            protected: encode_header(header)?,
            unprotected: None,
            payload: b64(payload),
            signature: Vec::new(),
        })
    }

    pub fn signing_input(&self) -> Vec<u8> {
        format!("{}.{}", self.protected, self.payload).into_bytes()
    }

    pub fn protected_header(&self) -> Result<Header, WireError> {
        decode_header(&self.protected)
    }

    pub fn header(&self) -> Result<Header, WireError> {
        let protected = self.protected_header()?;
        match &self.unprotected {
            Some(unprotected) => merge_headers([&protected, unprotected]),
            None => Ok(protected),
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, WireError> {
        unb64(&self.payload, "payload")
    }

    pub fn encode(&self, mode: SerializationMode) -> Result<String, WireError> {
        match mode {
            SerializationMode::Compact => {
                if self.unprotected.is_some() {
                    return Err(WireError::new("compact serialization cannot carry unprotected headers"));
                }
                Ok(format!("{}.{}.{}", self.protected, self.payload, b64(&self.signature)))
            }
            SerializationMode::Full => {
                let json = JsonJws {
                    payload: self.payload.clone(),
                    protected: Some(self.protected.clone()),
                    header: self.unprotected.clone(),
                    signature: Some(b64(&self.signature)),
                    signatures: None,
                };
                serde_json::to_string(&json).map_err(|e| WireError(format!("token does not serialize: {e}")))
            }
        }
    }

    pub fn decode(input: &str) -> Result<Self, WireError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(WireError::new("token is empty"));
        }
        let parsed = if looks_like_json(input) {
            Self::decode_json(input)?
        } else {
            let parts = split_compact(input, JWS_COMPACT_PARTS, "JWS")?;
            Self {
                protected: parts[0].to_string(),
                unprotected: None,
                payload: parts[1].to_string(),
                signature: unb64(parts[2], "signature")?,
            }
        };
        parsed.header()?;
        parsed.payload()?;
        Ok(parsed)
    }

    fn decode_json(input: &str) -> Result<Self, WireError> {
        let json: JsonJws =
            serde_json::from_str(input).map_err(|e| WireError(format!("JWS JSON is malformed: {e}")))?;
        let (protected, header, signature) = match json.signatures {
            Some(mut signatures) => {
                if signatures.len() != 1 {
                    return Err(WireError(format!(
                        "JWS must have exactly one signature, found {}",
                        signatures.len()
                    )));
                }
                let only = signatures.remove(0);
                (only.protected, only.header, only.signature)
            }
            None => (
                json.protected,
                json.header,
                json.signature.ok_or_else(|| WireError::new("JWS signature is missing"))?,
            ),
        };
        Ok(Self {
            protected: protected.unwrap_or_default(),
            unprotected: header,
            payload: json.payload,
            signature: unb64(&signature, "signature")?,
        })
    }
}

/// Header and claims of a signed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub header: Header,
    pub claims: ClaimSet,
}

impl Token {
    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }
}

/// Read header and claims without checking the signature.
pub fn decode_unverified(serialized: &str) -> Result<Token, WireError> {
    let parts = JwsParts::decode(serialized)?;
    token_from_parts(&parts)
}

pub(crate) fn token_from_parts(parts: &JwsParts) -> Result<Token, WireError> {
    let payload = parts.payload()?;
    Ok(Token {
        header: parts.header()?,
        claims: parse_claims(&payload).map_err(WireError)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn header(value: Value) -> Header {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn sample_jwe() -> JweParts {
        JweParts {
            protected: encode_header(&header(json!({"alg": "RSA-OAEP", "enc": "A128GCM"}))).unwrap(),
            unprotected: None,
            encrypted_key: vec![1, 2, 3],
            iv: vec![7; 12],
            ciphertext: b"secret".to_vec(),
            tag: vec![9; 16],
            aad: None,
        }
    }

    #[test]
    fn jwe_compact_has_five_parts() {
        let jwe = sample_jwe();
        let compact = jwe.encode_compact().unwrap();
        assert_eq!(compact.split('.').count(), 5);
        assert_eq!(JweParts::decode(&compact).unwrap(), jwe);
    }

    #[test]
    fn jwe_full_is_flattened_json() {
        let jwe = sample_jwe();
        let full = jwe.encode_full().unwrap();
        let value: Value = serde_json::from_str(&full).unwrap();
        for member in ["protected", "encrypted_key", "iv", "ciphertext", "tag"] {
            assert!(value.get(member).is_some(), "missing {member}");
        }
        assert_eq!(JweParts::decode(&full).unwrap(), jwe);
    }

    #[test]
    fn jwe_general_json_with_one_recipient() {
        let jwe = sample_jwe();
        let general = json!({
            "protected": jwe.protected,
            "recipients": [{"header": {"kid": "k1"}, "encrypted_key": b64(&jwe.encrypted_key)}],
            "iv": b64(&jwe.iv),
            "ciphertext": b64(&jwe.ciphertext),
            "tag": b64(&jwe.tag),
        });
        let parsed = JweParts::decode(&general.to_string()).unwrap();
        assert_eq!(parsed.encrypted_key, jwe.encrypted_key);
        assert_eq!(parsed.header().unwrap()["kid"], "k1");
        assert_eq!(parsed.header().unwrap()["alg"], "RSA-OAEP");
    }

    #[test]
    fn jwe_rejects_two_recipients_and_duplicate_params() {
        let jwe = sample_jwe();
        let two = json!({
            "protected": jwe.protected,
            "recipients": [{"encrypted_key": "AQ"}, {"encrypted_key": "Ag"}],
            "iv": b64(&jwe.iv), "ciphertext": "AA", "tag": b64(&jwe.tag),
        });
        assert!(JweParts::decode(&two.to_string()).is_err());

        let dup = json!({
            "protected": jwe.protected,
            "unprotected": {"alg": "dir"},
            "iv": b64(&jwe.iv), "ciphertext": "AA", "tag": b64(&jwe.tag),
        });
        assert!(JweParts::decode(&dup.to_string()).is_err());
    }

    #[test]
    fn jwe_rejects_malformed_compact() {
        for bad in ["", "a.b.c", "a.b.c.d.e.f", "!!.AA.AA.AA.AA", ".AA.AA.AA.AA"] {
            assert!(JweParts::decode(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn aad_input_includes_json_aad() {
        let mut jwe = sample_jwe();
        assert_eq!(jwe.aad_input(), jwe.protected.as_bytes());
        jwe.aad = Some("eHl6".to_string());
        assert_eq!(jwe.aad_input(), format!("{}.eHl6", jwe.protected).into_bytes());
        assert!(jwe.encode_compact().is_err());
    }

    #[test]
    fn jws_both_forms() {
        let mut jws = JwsParts::new(&header(json!({"alg": "HS256"})), br#"{"sub":"a"}"#).unwrap();
        jws.signature = vec![5; 32];
        for mode in SerializationMode::ALL {
            let encoded = jws.encode(mode).unwrap();
            let token = decode_unverified(&encoded).unwrap();
            assert_eq!(token.alg(), Some("HS256"));
            assert_eq!(token.claims["sub"], "a");
        }
    }

    #[test]
    fn trailing_newline_is_ignored() {
        let compact = format!("{}\n", sample_jwe().encode_compact().unwrap());
        assert!(JweParts::decode(&compact).is_ok());
    }

    proptest! {
        #[test]
        fn decoders_never_panic(input in "\\PC{0,64}") {
            let _ = JweParts::decode(&input);
            let _ = JwsParts::decode(&input);
        }

        #[test]
        fn dotted_noise_never_panics(parts in proptest::collection::vec("[A-Za-z0-9_-]{0,12}", 0..8)) {
            let joined = parts.join(".");
            let _ = JweParts::decode(&joined);
            let _ = decode_unverified(&joined);
        }
    }
}
