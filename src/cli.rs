//! Command line front end: argument parsing, logging setup, key loading and
//! output rendering. The binary in `src/bin/jwe-tool.rs` only calls [`main`].

use std::error::Error as StdError;
use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::alg::{ContentEncryption, KeyManagement, SerializationMode, SignatureAlgorithm};
use crate::config::PipelineConfig;
use crate::envelope::{EncodeOptions, Pipeline, SignOptions, Trust, DEFAULT_DURATION};
use crate::handle::KeyHandle;
use crate::password::EnvPassword;
use crate::resolver::Resolver;
use crate::wire::Token;

type CliResult<T = ()> = Result<T, Box<dyn StdError + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "jwe-tool", version, about = "Sign, encrypt, decrypt and verify JOSE envelopes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// trace, debug, info, warn, error or all
    #[arg(long, global = true, default_value = "info", env = "JWE_TOOL_LOG_LEVEL")]
    pub log_level: String,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true, env = "JWE_TOOL_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Optionally sign a JSON claim set, then encrypt it
    Encrypt(EncryptArgs),
    /// Decrypt an envelope and verify the token inside
    Decrypt(DecryptArgs),
    /// Sign a JSON claim set
    Sign(SignArgs),
    /// Verify a signed token
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
pub struct IoArgs {
    /// Input file (stdin when omitted)
    #[arg(long = "in", value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PasswordArgs {
    /// Fail instead of prompting for a key password
    #[arg(long)]
    pub no_prompt: bool,

    /// Read key passwords from this environment variable
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Signature algorithm
    #[arg(long, default_value = "RS256", env = "JWE_TOOL_SIGN_ALG")]
    pub sign_alg: SignatureAlgorithm,

    /// Key id: selects the key in a key set and goes into the token header
    #[arg(long, default_value = "", env = "JWE_TOOL_KID")]
    pub kid: String,

    /// Token lifetime, e.g. 30m or 2h45m
    #[arg(long, default_value = DEFAULT_DURATION, env = "JWE_TOOL_DURATION")]
    pub duration: String,
}

#[derive(Args, Debug)]
pub struct EncryptArgs {
    #[command(flatten)]
    pub io: IoArgs,
    #[command(flatten)]
    pub password: PasswordArgs,
    #[command(flatten)]
    pub token: TokenArgs,

    /// Signing key; the payload is encrypted as-is when omitted
    #[arg(long, value_name = "FILE", env = "JWE_TOOL_SIGN_KEY")]
    pub sign_key: Option<PathBuf>,

    /// Recipient key
    #[arg(long, value_name = "FILE", env = "JWE_TOOL_ENCRYPT_KEY")]
    pub encrypt_key: PathBuf,

    /// Key id of the recipient key inside a key set
    #[arg(long, default_value = "")]
    pub enc_kid: String,

    /// Key management algorithm
    #[arg(long, default_value = "RSA-OAEP", env = "JWE_TOOL_KEY_ALG")]
    pub key_alg: KeyManagement,

    /// Content encryption algorithm
    #[arg(long, default_value = "A128GCM", env = "JWE_TOOL_ENC")]
    pub enc: ContentEncryption,

    /// compact or full, applied to the token and the envelope
    #[arg(long, default_value = "compact")]
    pub serialization: SerializationMode,
}

#[derive(Args, Debug)]
pub struct DecryptArgs {
    #[command(flatten)]
    pub io: IoArgs,
    #[command(flatten)]
    pub password: PasswordArgs,

    /// Recipient private key
    #[arg(long, value_name = "FILE", env = "JWE_TOOL_DECRYPT_KEY")]
    pub decrypt_key: PathBuf,

    /// Key id of the decryption key inside a key set
    #[arg(long, default_value = "")]
    pub enc_kid: String,

    /// Signer public key; verification is skipped when omitted
    #[arg(long, value_name = "FILE", env = "JWE_TOOL_VERIFY_KEY")]
    pub verify_key: Option<PathBuf>,

    /// Key id of the verification key
    #[arg(long, default_value = "", env = "JWE_TOOL_KID")]
    pub kid: String,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub io: IoArgs,
    #[command(flatten)]
    pub password: PasswordArgs,
    #[command(flatten)]
    pub token: TokenArgs,

    #[arg(long, value_name = "FILE", env = "JWE_TOOL_SIGN_KEY")]
    pub sign_key: PathBuf,

    /// compact or full
    #[arg(long, default_value = "compact")]
    pub serialization: SerializationMode,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub io: IoArgs,
    #[command(flatten)]
    pub password: PasswordArgs,

    #[arg(long, value_name = "FILE", env = "JWE_TOOL_VERIFY_KEY")]
    pub verify_key: PathBuf,

    #[arg(long, default_value = "", env = "JWE_TOOL_KID")]
    pub kid: String,
}

pub fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Map a log level name onto a filter directive. `RUST_LOG` wins when set.
fn filter_directive(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "all" => "trace".to_string(),
        "fatal" | "panic" => "error".to_string(),
        "disabled" => "off".to_string(),
        other => other.to_string(),
    }
}

pub fn init_logging(level: &str, file: Option<&Path>) -> CliResult {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(level))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()?;
        }
        None => builder.with_writer(io::stderr).try_init()?,
    }
    Ok(())
}

pub fn run(command: Command) -> CliResult {
    let pipeline = Pipeline::new(PipelineConfig::default());
    match command {
        Command::Encrypt(args) => encrypt(&pipeline, args),
        Command::Decrypt(args) => decrypt(&pipeline, args),
        Command::Sign(args) => sign(&pipeline, args),
        Command::Verify(args) => verify(&pipeline, args),
    }
}

fn encrypt(pipeline: &Pipeline, args: EncryptArgs) -> CliResult {
    let keys = KeyLoader::new(&args.password);
    let sign = SignOptions {
        algorithm: args.token.sign_alg,
        private_key: match &args.sign_key {
            Some(path) => Some(keys.private(path, &args.token.kid)?),
            None => None,
        },
        public_key: None,
        key_id: args.token.kid.clone(),
        duration: args.token.duration.clone(),
        serialization: args.serialization,
    };
    let encode = EncodeOptions {
        algorithm: args.key_alg,
        content_encoding: args.enc,
        private_key: None,
        public_key: Some(keys.public(&args.encrypt_key, &args.enc_kid)?),
        serialization: args.serialization,
    };

    let payload = read_input(args.io.input.as_deref())?;
    let sealed = pipeline.sign_then_encrypt(&payload, &sign, &encode)?;
    if let Some(signed) = &sealed.signed {
        for warning in &signed.warnings {
            eprintln!("{} {}", "warning:".yellow().bold(), warning);
        }
    }
    write_output(args.io.out.as_deref(), sealed.envelope.as_bytes())
}

fn decrypt(pipeline: &Pipeline, args: DecryptArgs) -> CliResult {
    let keys = KeyLoader::new(&args.password);
    let encode = EncodeOptions {
        private_key: Some(keys.private(&args.decrypt_key, &args.enc_kid)?),
        ..EncodeOptions::default()
    };
    let sign = SignOptions {
        public_key: match &args.verify_key {
            Some(path) => Some(keys.public(path, &args.kid)?),
            None => None,
        },
        key_id: args.kid.clone(),
        ..SignOptions::default()
    };

    let envelope = String::from_utf8(read_input(args.io.input.as_deref())?)?;
    let opened = pipeline.decrypt_then_verify(&envelope, &encode, &sign)?;

    let report = Report::new();
    match &args.io.out {
        Some(path) => fs::write(path, &opened.plaintext)?,
        None => report.section("Plaintext", &String::from_utf8_lossy(&opened.plaintext)),
    }
    report.json("Envelope header", &Value::Object(opened.header.clone()))?;
    if let Some(token) = &opened.token {
        report.token(token)?;
    }
    report.trust(&opened.trust);
    Ok(())
}

fn sign(pipeline: &Pipeline, args: SignArgs) -> CliResult {
    let keys = KeyLoader::new(&args.password);
    let opts = SignOptions {
        algorithm: args.token.sign_alg,
        private_key: Some(keys.private(&args.sign_key, &args.token.kid)?),
        public_key: None,
        key_id: args.token.kid.clone(),
        duration: args.token.duration.clone(),
        serialization: args.serialization,
    };
    let payload = read_input(args.io.input.as_deref())?;
    let signed = pipeline.sign(&payload, &opts)?;
    for warning in &signed.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
    write_output(args.io.out.as_deref(), signed.serialized.as_bytes())
}

fn verify(pipeline: &Pipeline, args: VerifyArgs) -> CliResult {
    let keys = KeyLoader::new(&args.password);
    let opts = SignOptions {
        public_key: Some(keys.public(&args.verify_key, &args.kid)?),
        key_id: args.kid.clone(),
        ..SignOptions::default()
    };
    let token = String::from_utf8(read_input(args.io.input.as_deref())?)?;
    let checked = pipeline.verify(&token, &opts)?;

    let report = Report::new();
    report.token(&checked.token)?;
    report.trust(&checked.trust);
    if let Some(path) = &args.io.out {
        let claims = serde_json::to_vec_pretty(&checked.token.claims)?;
        fs::write(path, claims)?;
    }
    Ok(())
}

/// Reads key files and resolves them with the command's password settings.
struct KeyLoader {
    resolver: Resolver,
    allow_prompt: bool,
}

impl KeyLoader {
    fn new(args: &PasswordArgs) -> Self {
        let resolver = match &args.password_env {
            Some(var) => Resolver::new(EnvPassword::new(var.clone())),
            None => Resolver::default(),
        };
        Self {
            resolver,
            allow_prompt: !args.no_prompt,
        }
    }

    fn private(&self, path: &Path, kid: &str) -> CliResult<KeyHandle> {
        let bytes = read_key(path)?;
        Ok(self.resolver.resolve_private(&bytes, self.allow_prompt, kid)?)
    }

    fn public(&self, path: &Path, kid: &str) -> CliResult<KeyHandle> {
        let bytes = read_key(path)?;
        Ok(self.resolver.resolve_public(&bytes, self.allow_prompt, kid)?)
    }
}

fn read_key(path: &Path) -> CliResult<Vec<u8>> {
    tracing::debug!(path = %path.display(), "reading key file");
    fs::read(path).map_err(|e| format!("{}: {}", path.display(), e).into())
}

fn read_input(path: Option<&Path>) -> CliResult<Vec<u8>> {
    match path {
        Some(path) => fs::read(path).map_err(|e| format!("{}: {}", path.display(), e).into()),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> CliResult {
    match path {
        Some(path) => fs::write(path, bytes)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

/// Human readable output on stdout, coloured when stdout is a terminal.
struct Report {
    color: bool,
}

impl Report {
    fn new() -> Self {
        let color = io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self { color }
    }

    fn title(&self, title: &str) -> String {
        if self.color {
            title.bold().cyan().to_string()
        } else {
            title.to_string()
        }
    }

    fn section(&self, title: &str, body: &str) {
        println!("{}", self.title(title));
        println!("{}", body);
    }

    fn json(&self, title: &str, value: &Value) -> CliResult {
        let pretty = serde_json::to_string_pretty(value)?;
        let body = if self.color { pretty.green().to_string() } else { pretty };
        self.section(title, &body);
        Ok(())
    }

    fn token(&self, token: &Token) -> CliResult {
        self.json("Token header", &Value::Object(token.header.clone()))?;
        self.json("Token claims", &Value::Object(token.claims.clone()))
    }

    fn trust(&self, trust: &Trust) {
        let (text, ok) = match trust {
            Trust::Verified => ("signature verified".to_string(), true),
            Trust::Unverified(warning) => (warning.to_string(), false),
            Trust::NotChecked => ("signature not checked".to_string(), false),
        };
        match (self.color, ok) {
            (true, true) => println!("{}", text.green().bold()),
            (true, false) => println!("{}", text.yellow().bold()),
            (false, _) => println!("{}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_encrypt_flags() {
        let cli = Cli::try_parse_from([
            "jwe-tool",
            "encrypt",
            "--encrypt-key",
            "pub.pem",
            "--sign-key",
            "key.pem",
            "--sign-alg",
            "ES256",
            "--key-alg",
            "RSA-OAEP-256",
            "--enc",
            "A256GCM",
            "--serialization",
            "full",
            "--kid",
            "k1",
            "--no-prompt",
            "--log-level",
            "all",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "all");
        let Command::Encrypt(args) = cli.command else {
            panic!("expected encrypt");
        };
        assert_eq!(args.token.sign_alg, SignatureAlgorithm::Es256);
        assert_eq!(args.key_alg, KeyManagement::RsaOaep256);
        assert_eq!(args.enc, ContentEncryption::A256Gcm);
        assert_eq!(args.serialization, SerializationMode::Full);
        assert_eq!(args.token.kid, "k1");
        assert!(args.password.no_prompt);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let parsed = Cli::try_parse_from(["jwe-tool", "sign", "--sign-key", "k.pem", "--sign-alg", "none"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn second_logging_init_is_an_error() {
        let path = std::env::temp_dir().join(format!("jwe-tool-log-{}.txt", std::process::id()));
        init_logging("debug", Some(&path)).unwrap();
        let again = init_logging("info", None);
        assert!(again.is_err());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn level_names() {
        assert_eq!(filter_directive("all"), "trace");
        assert_eq!(filter_directive("WARN"), "warn");
        assert_eq!(filter_directive("fatal"), "error");
    }
}
