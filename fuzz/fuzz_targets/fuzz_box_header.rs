#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_demux::{BoxHeader, BoxSize, Decode, Encode, compliance};

fuzz_target!(|data: &[u8]| {
    if let Ok((header, _)) = BoxHeader::decode(data) {
        let end = data.len() as u64;
        let _ = match header.box_size {
            BoxSize::U32(size) => compliance::validate_32bit_box_size(size, 0, end),
            BoxSize::U64(size) => compliance::validate_64bit_box_size(size, 0, end),
        };
        let _ = header.encode_to_vec();
    }
});
