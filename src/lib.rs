//! # jwe-tool
//!
//! Key resolution and sign-then-encrypt JOSE envelopes.
//!
//! ## Quick Start
//!
//! ```rust
//! use jwe_tool::{EncodeOptions, KeyManagement, Pipeline, PipelineConfig, Resolver, SignOptions};
//! use jwe_tool::password::StaticPassword;
//!
//! let resolver = Resolver::new(StaticPassword::new(""));
//! let key = br#"{"kty":"oct","kid":"sym","k":"AQIDBAUGBwgJCgsMDQ4PEA"}"#;
//! let pair = resolver.resolve_key_pair(key, false, "sym").unwrap();
//!
//! let encode = EncodeOptions {
//!     algorithm: KeyManagement::Direct,
//!     private_key: pair.private,
//!     public_key: pair.public,
//!     ..EncodeOptions::default()
//! };
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let sealed = pipeline
//!     .sign_then_encrypt(b"hello", &SignOptions::default(), &encode)
//!     .unwrap();
//! let opened = pipeline
//!     .decrypt_then_verify(&sealed.envelope, &encode, &SignOptions::default())
//!     .unwrap();
//!
//! assert_eq!(opened.plaintext, b"hello");
//! ```
//!
//! ## Key formats
//!
//! PEM or DER PKCS#1, PKCS#8 (plain or encrypted), SEC1, X.509 certificates,
//! SubjectPublicKeyInfo, JSON Web Keys and JSON Web Key Sets. Legacy
//! `Proc-Type: 4,ENCRYPTED` PEM blocks are decrypted after a password prompt.
//! Elliptic curve keys may be on P-256, P-384 or P-521 and sign with `ES256`,
//! `ES384` and `ES512` respectively.
//!
//! ## What's NOT Provided
//!
//! - Key generation
//! - Certificate chain validation
//! - Network transport

#![deny(unsafe_code)]

mod aead;
mod armor;

pub mod alg;
pub mod claims;
pub mod config;
pub mod decoder;
pub mod duration;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod jwk;
pub mod password;
pub mod provider;
pub mod resolver;
pub mod wire;

#[cfg(feature = "cli")]
pub mod cli;

pub use alg::{ContentEncryption, KeyManagement, SerializationMode, SignatureAlgorithm};
pub use claims::{Augmented, ClaimSet, ClaimsAugmenter, Clock, FixedClock, SystemClock};
pub use config::PipelineConfig;
pub use decoder::{check_kind, Decoded, Decoder, DECODER_ORDER};
pub use envelope::{inspect, Checked, EncodeOptions, Opened, Pipeline, Sealed, SignOptions, Signed, Trust};
pub use error::{AuthenticityWarning, DecodeAttempt, Error, PipelineStep, Result};
pub use handle::{Curve, EcPrivateKey, EcPublicKey, KeyContainer, KeyHandle, KeyKind, KeyMaterial, KeyOrigin, KeyPair};
pub use provider::{CryptoProvider, ProviderError, RustCryptoProvider};
pub use resolver::Resolver;
pub use wire::{Header, Token};
