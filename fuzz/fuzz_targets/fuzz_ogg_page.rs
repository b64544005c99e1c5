#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_demux::{Decode, Encode, ogg::OggPage};

fuzz_target!(|data: &[u8]| {
    if let Ok((page, _)) = OggPage::decode(data) {
        let _ = page.packet_spans();
        let _ = page.encode_to_vec();
    }
});
