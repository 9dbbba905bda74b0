//! Claim augmentation: issued-at, not-before and expiry derived from a
//! validity duration, plus the header-level key identifier.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::duration::parse_duration;

/// JSON object of claims, in the caller's key order.
pub type ClaimSet = serde_json::Map<String, Value>;

pub const CLAIM_ISSUED_AT: &str = "iat";
pub const CLAIM_NOT_BEFORE: &str = "nbf";
pub const CLAIM_EXPIRES: &str = "exp";

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Clock pinned at `secs` seconds since the Unix epoch.
    pub fn at_unix(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Output of [`ClaimsAugmenter::augment`].
#[derive(Debug, Clone, PartialEq)]
pub struct Augmented {
    pub claims: ClaimSet,
    /// Key identifier for the token header, if one was requested.
    pub kid: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    /// Non-fatal problems, e.g. a duration that fell back to the default.
    pub warnings: Vec<String>,
}

pub struct ClaimsAugmenter<'a> {
    clock: &'a dyn Clock,
    fallback: Duration,
}

impl<'a> ClaimsAugmenter<'a> {
    pub fn new(clock: &'a dyn Clock, fallback: Duration) -> Self {
        Self { clock, fallback }
    }

    /// Stamp `iat`/`nbf`/`exp` onto `claims`. Other claims are left alone.
    pub fn augment(&self, mut claims: ClaimSet, duration: &str, key_id: &str) -> Augmented {
        let mut warnings = Vec::new();
        let validity = match parse_duration(duration) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    duration,
                    fallback_secs = self.fallback.num_seconds(),
                    "token duration not valid, using default"
                );
                warnings.push(format!(
                    "{e}, token duration reset to {}s",
                    self.fallback.num_seconds()
                ));
                self.fallback
            }
        };

        let issued_at = self.clock.now().timestamp();
        let expires_at = issued_at.saturating_add(validity.num_seconds());

        claims.insert(CLAIM_ISSUED_AT.to_string(), Value::from(issued_at));
        claims.insert(CLAIM_NOT_BEFORE.to_string(), Value::from(issued_at));
        claims.insert(CLAIM_EXPIRES.to_string(), Value::from(expires_at));

        Augmented {
            claims,
            kid: (!key_id.is_empty()).then(|| key_id.to_string()),
            issued_at,
            expires_at,
            warnings,
        }
    }
}

/// Parse a payload as a JSON object claim set.
pub fn parse_claims(payload: &[u8]) -> Result<ClaimSet, String> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("claims must be a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(format!("claims are not valid JSON: {e}")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Check `exp` and `nbf` against `now`, allowing `leeway`.
pub fn check_validity(claims: &ClaimSet, now: DateTime<Utc>, leeway: Duration) -> Result<(), String> {
    let now = now.timestamp();
    let leeway = leeway.num_seconds();
    if let Some(exp) = claims.get(CLAIM_EXPIRES) {
        let exp = exp.as_i64().ok_or("exp is not a number")?;
        if now > exp.saturating_add(leeway) {
            return Err(format!("token expired at {exp}"));
        }
    }
    if let Some(nbf) = claims.get(CLAIM_NOT_BEFORE) {
        let nbf = nbf.as_i64().ok_or("nbf is not a number")?;
        if now < nbf.saturating_sub(leeway) {
            return Err(format!("token not valid before {nbf}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn augment(claims: &str, duration: &str, kid: &str) -> Augmented {
        let clock = FixedClock::at_unix(NOW);
        ClaimsAugmenter::new(&clock, Duration::hours(1))
            .augment(parse_claims(claims.as_bytes()).unwrap(), duration, kid)
    }

    #[test]
    fn two_hours_is_exactly_7200_seconds() {
        let out = augment(r#"{"sub":"alice"}"#, "2h", "");
        assert_eq!(out.issued_at, NOW);
        assert_eq!(out.expires_at - out.issued_at, 7200);
        assert_eq!(out.claims["iat"], NOW);
        assert_eq!(out.claims["nbf"], NOW);
        assert_eq!(out.claims["exp"], NOW + 7200);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn invalid_duration_falls_back_to_one_hour() {
        let out = augment(r#"{"sub":"alice"}"#, "two hours", "");
        assert_eq!(out.expires_at - out.issued_at, 3600);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("two hours"));
    }

    #[test]
    fn caller_claims_survive_and_stamps_overwrite() {
        let out = augment(r#"{"role":"admin","iat":1,"aud":["a","b"]}"#, "1h", "k1");
        assert_eq!(out.claims["role"], "admin");
        assert_eq!(out.claims["aud"], serde_json::json!(["a", "b"]));
        assert_eq!(out.claims["iat"], NOW);
        assert_eq!(out.kid.as_deref(), Some("k1"));
        assert!(!out.claims.contains_key("kid"));
        let keys: Vec<_> = out.claims.keys().map(String::as_str).collect();
        assert_eq!(keys, ["role", "iat", "aud", "nbf", "exp"]);
    }

    #[test]
    fn negative_duration_is_accepted() {
        let out = augment("{}", "-30m", "");
        assert_eq!(out.expires_at - out.issued_at, -1800);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(parse_claims(b"[1,2]").unwrap_err().contains("an array"));
        assert!(parse_claims(b"not json").is_err());
    }

    #[test]
    fn validity_window() {
        let claims = augment("{}", "1h", "").claims;
        let at = |secs| DateTime::from_timestamp(secs, 0).unwrap();
        assert!(check_validity(&claims, at(NOW + 10), Duration::zero()).is_ok());
        assert!(check_validity(&claims, at(NOW + 3601), Duration::zero()).is_err());
        assert!(check_validity(&claims, at(NOW + 3601), Duration::seconds(5)).is_ok());
        assert!(check_validity(&claims, at(NOW - 1), Duration::zero()).is_err());
    }
}
