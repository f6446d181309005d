#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Persisted cache entries come back from storage the app does not
    // control; decoding must never panic.
    let _ = serde_json::from_slice::<foyer_sync::store::CacheEntry>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<foyer_sync::store::CacheEntry>(s);
    }
});
