//! JSON Web Key (RFC 7517) model and conversion into key handles.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::handle::{Curve, EcPrivateKey, EcPublicKey, KeyHandle, KeyMaterial, KeyOrigin};

/// A single JSON Web Key. Only the members this crate consumes are modeled;
/// unknown members are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub d: Option<String>,
    #[serde(default)]
    pub p: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub dp: Option<String>,
    #[serde(default)]
    pub dq: Option<String>,
    #[serde(default)]
    pub qi: Option<String>,
    #[serde(default)]
    pub k: Option<String>,
}

/// `{"keys": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    /// Convert into a handle tagged with this key's `kid`.
    pub fn to_handle(&self) -> Result<KeyHandle, String> {
        let material = match self.kty.as_str() {
            "RSA" => self.rsa_material()?,
            "EC" => self.ec_material()?,
            "oct" => {
                let k = Zeroizing::new(decode_member("k", self.k.as_deref())?);
                if k.is_empty() {
                    return Err("oct key is empty".to_string());
                }
                KeyMaterial::Symmetric(k)
            }
            other => return Err(format!("unsupported key type {other:?}")),
        };
        Ok(KeyHandle::new(material)
            .with_kid(self.kid.clone().unwrap_or_default())
            .with_origin(KeyOrigin::Jwk))
    }

    fn rsa_material(&self) -> Result<KeyMaterial, String> {
        let n = biguint("n", self.n.as_deref())?;
        let e = biguint("e", self.e.as_deref())?;
        if self.d.is_none() {
            let key = RsaPublicKey::new(n, e).map_err(|err| err.to_string())?;
            return Ok(KeyMaterial::RsaPublic(key));
        }
        let d = biguint("d", self.d.as_deref())?;
        let primes = match (self.p.as_deref(), self.q.as_deref()) {
            (Some(p), Some(q)) => vec![biguint("p", Some(p))?, biguint("q", Some(q))?],
            _ => return Err("RSA private key without primes p and q".to_string()),
        };
        let key = RsaPrivateKey::from_components(n, e, d, primes).map_err(|err| err.to_string())?;
        key.validate().map_err(|err| err.to_string())?;
        Ok(KeyMaterial::RsaPrivate(key))
    }

    fn ec_material(&self) -> Result<KeyMaterial, String> {
        let curve = match self.crv.as_deref() {
            Some(name) => Curve::from_jwk_name(name).ok_or_else(|| format!("unsupported curve {name}"))?,
            None => return Err("EC key without crv".to_string()),
        };
        let x = decode_member("x", self.x.as_deref())?;
        let y = decode_member("y", self.y.as_deref())?;
        let public = EcPublicKey::from_coordinates(curve, &x, &y)?;

        let Some(d) = self.d.as_deref() else {
            return Ok(KeyMaterial::EcPublic(public));
        };
        let d = Zeroizing::new(decode_member("d", Some(d))?);
        let secret = EcPrivateKey::from_scalar(curve, &d)?;
        if secret.public_key() != public {
            return Err("private scalar does not match x/y".to_string());
        }
        Ok(KeyMaterial::EcPrivate(secret))
    }
}

impl JwkSet {
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

fn decode_member(name: &str, value: Option<&str>) -> Result<Vec<u8>, String> {
    let value = value.ok_or_else(|| format!("missing member {name:?}"))?;
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| format!("member {name:?}: {e}"))
}

fn biguint(name: &str, value: Option<&str>) -> Result<BigUint, String> {
    Ok(BigUint::from_bytes_be(&decode_member(name, value)?))
}
