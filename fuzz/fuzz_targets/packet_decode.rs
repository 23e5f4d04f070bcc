//! Fuzz target for packet decoding
//!
//! Feeds arbitrary bytes through both decode paths:
//! - `Packet::decode` on a single buffer
//! - `Packet::decode_from` on a stream buffer, draining every whole packet
//!
//! Neither may panic. Every packet that decodes must re-encode to exactly the
//! bytes it was decoded from.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tickwire_proto::Packet;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(data) {
        let mut out = Vec::with_capacity(packet.encoded_len());
        packet.encode(&mut out).expect("decoded packet must re-encode");
        assert_eq!(out.as_slice(), &data[..out.len()]);
    }

    let mut stream = BytesMut::from(data);
    loop {
        let before = stream.len();
        match Packet::decode_from(&mut stream) {
            Ok(Some(_)) => assert!(stream.len() < before, "decode_from must consume input"),
            Ok(None) | Err(_) => break,
        }
    }
});
