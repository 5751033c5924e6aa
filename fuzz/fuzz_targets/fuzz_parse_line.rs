#![no_main]

use libfuzzer_sys::fuzz_target;
use lobby_session_client::protocol::{parse, Event};

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let event = parse(&line);

    // Unparseable input must carry the original text back out.
    if let Event::ParseError { raw, .. } = &event {
        assert_eq!(raw.as_str(), line.as_ref());
    }

    // Every event must survive the trip to a view in another process.
    let json = serde_json::to_string(&event).expect("event serializes");
    let back: Event = serde_json::from_str(&json).expect("event deserializes");
    assert_eq!(back, event);
});
