//! jwe-tool: sign, encrypt, decrypt and verify JOSE envelopes.
//!
//! Usage:
//!   jwe-tool encrypt --encrypt-key <FILE> [--sign-key <FILE>] [--kid <KID>] [--in <FILE>]
//!   jwe-tool decrypt --decrypt-key <FILE> [--verify-key <FILE>] [--in <FILE>]
//!   jwe-tool sign    --sign-key <FILE> [--duration <DUR>] [--in <FILE>]
//!   jwe-tool verify  --verify-key <FILE> [--in <FILE>]

use std::process::ExitCode;

fn main() -> ExitCode {
    jwe_tool::cli::main()
}
