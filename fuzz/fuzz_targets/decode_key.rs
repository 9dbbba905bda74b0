#![no_main]

use jwe_tool::password::StaticPassword;
use jwe_tool::Resolver;
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static RESOLVER: Lazy<Resolver> = Lazy::new(|| Resolver::new(StaticPassword::new("fuzz")));

fuzz_target!(|data: &[u8]| {
    let (kid, blob) = match data.split_first() {
        Some((n, rest)) => {
            let n = (*n as usize).min(rest.len());
            (String::from_utf8_lossy(&rest[..n]).into_owned(), &rest[n..])
        }
        None => return,
    };

    let _ = RESOLVER.resolve_key_pair(blob, false, &kid);
    let _ = RESOLVER.resolve_public(blob, true, &kid);
});
