#![no_main]

use jwe_tool::password::StaticPassword;
use jwe_tool::{EncodeOptions, Pipeline, PipelineConfig, Resolver, SignOptions};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static OPTIONS: Lazy<(EncodeOptions, SignOptions)> = Lazy::new(|| {
    let pair = Resolver::new(StaticPassword::new(""))
        .resolve_key_pair(include_bytes!("../../tests/fixtures/rsa_pkcs8.pem"), false, "")
        .unwrap();
    let encode = EncodeOptions {
        private_key: pair.private,
        public_key: pair.public.clone(),
        ..EncodeOptions::default()
    };
    let sign = SignOptions {
        public_key: pair.public,
        ..SignOptions::default()
    };
    (encode, sign)
});

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = core::str::from_utf8(data) else {
        return;
    };
    let (encode, sign) = &*OPTIONS;
    let pipeline = Pipeline::new(PipelineConfig::default());

    let _ = pipeline.decrypt_then_verify(envelope, encode, sign);
    let _ = pipeline.verify(envelope, sign);
});
