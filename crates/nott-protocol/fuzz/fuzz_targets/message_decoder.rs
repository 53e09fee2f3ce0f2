#![no_main]

use libfuzzer_sys::fuzz_target;
use nott_protocol::codec;
use nott_protocol::RequestKind;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary datagrams must never panic, whatever the pending kind
    for kind in [
        RequestKind::Ping,
        RequestKind::FindNode,
        RequestKind::GetPeers,
        RequestKind::Get,
    ] {
        if let Ok(msg) = codec::decode(data, |_| Some(kind)) {
            // Whatever we accepted must be encodable again
            if let Ok(encoded) = codec::encode(&msg) {
                let _ = codec::decode(&encoded, |_| Some(kind));
            }
        }
    }
});
