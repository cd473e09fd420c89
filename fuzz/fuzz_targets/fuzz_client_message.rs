#![no_main]

use libfuzzer_sys::fuzz_target;
use omok_room_client::protocol::ClientMessage;

fuzz_target!(|data: &[u8]| {
    // Any bytes that parse as a ClientMessage must survive a serialize /
    // reparse cycle unchanged.
    if let Ok(msg) = serde_json::from_slice::<ClientMessage>(data) {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(_) => return,
        };
        let reparsed: ClientMessage = match serde_json::from_str(&json) {
            Ok(reparsed) => reparsed,
            Err(_) => return,
        };
        assert_eq!(msg, reparsed);
    }
});
