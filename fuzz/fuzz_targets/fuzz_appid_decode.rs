#![no_main]

use libfuzzer_sys::fuzz_target;
use spk_rs::appid::{decode, encode};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding must never panic, and whatever decodes is stable through
    // a canonical re-encoding
    if let Ok(decoded) = decode(text) {
        assert_eq!(decode(&encode(&decoded)).ok(), Some(decoded));
    }

    let _ = decode(&encode(data));
});
