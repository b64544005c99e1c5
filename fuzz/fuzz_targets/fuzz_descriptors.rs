#![no_main]

use libfuzzer_sys::fuzz_target;
use shiguredo_demux::{Decode, descriptors::EsDescriptor};

fuzz_target!(|data: &[u8]| {
    if let Ok((descriptor, _)) = EsDescriptor::decode(data) {
        let _ = descriptor.dec_config_descr.is_aac();
    }
});
