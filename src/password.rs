//! Password input for protected key material.

use std::env;

use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Supplies the passphrase of an encrypted key block.
pub trait PasswordSource: Send + Sync {
    fn read_password(&self, prompt: &str) -> Result<Zeroizing<String>>;
}

/// Blocking, echo-suppressed read from the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPassword;

impl PasswordSource for TerminalPassword {
    fn read_password(&self, prompt: &str) -> Result<Zeroizing<String>> {
        dialoguer::Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| Error::PasswordInputAborted(e.to_string()))
    }
}

/// A password known up front (tests, scripted use).
#[derive(Clone)]
pub struct StaticPassword(Zeroizing<String>);

impl StaticPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }
}

impl PasswordSource for StaticPassword {
    fn read_password(&self, _prompt: &str) -> Result<Zeroizing<String>> {
        Ok(self.0.clone())
    }
}

/// Reads the password from an environment variable at prompt time.
#[derive(Debug, Clone)]
pub struct EnvPassword {
    var: String,
}

impl EnvPassword {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl PasswordSource for EnvPassword {
    fn read_password(&self, _prompt: &str) -> Result<Zeroizing<String>> {
        env::var(&self.var)
            .map(Zeroizing::new)
            .map_err(|e| Error::PasswordInputAborted(format!("{}: {}", self.var, e)))
    }
}

/// Per-call gate around a [`PasswordSource`]: honours the prompt switch and
/// asks at most once, reusing the answer for the rest of the call.
pub(crate) struct PasswordGate<'a> {
    source: &'a dyn PasswordSource,
    allow_prompt: bool,
    answer: Option<Zeroizing<String>>,
}

impl<'a> PasswordGate<'a> {
    pub(crate) fn new(source: &'a dyn PasswordSource, allow_prompt: bool) -> Self {
        Self {
            source,
            allow_prompt,
            answer: None,
        }
    }

    pub(crate) fn obtain(&mut self, label: &str) -> Result<&str> {
        if !self.allow_prompt {
            return Err(Error::PasswordInputAborted(format!(
                "{label} is password protected and prompting is disabled"
            )));
        }
        if self.answer.is_none() {
            tracing::debug!(label, "requesting password for protected key block");
            let answer = self.source.read_password("Password")?;
            self.answer = Some(answer);
        }
        Ok(self.answer.as_deref().map(String::as_str).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl PasswordSource for Counting {
        fn read_password(&self, _prompt: &str) -> Result<Zeroizing<String>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new("pw".to_string()))
        }
    }

    #[test]
    fn gate_asks_once() {
        let source = Counting(AtomicUsize::new(0));
        let mut gate = PasswordGate::new(&source, true);
        assert_eq!(gate.obtain("key").unwrap(), "pw");
        assert_eq!(gate.obtain("key").unwrap(), "pw");
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gate_refuses_when_disabled() {
        let source = Counting(AtomicUsize::new(0));
        let mut gate = PasswordGate::new(&source, false);
        assert!(matches!(gate.obtain("key"), Err(Error::PasswordInputAborted(_))));
        assert_eq!(source.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn env_password_reports_missing_variable() {
        let source = EnvPassword::new("JWE_TOOL_TEST_SURELY_UNSET_VARIABLE");
        assert!(matches!(
            source.read_password("Password"),
            Err(Error::PasswordInputAborted(_))
        ));
    }
}
