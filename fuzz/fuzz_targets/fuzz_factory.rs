#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use shiguredo_demux::{
    buffer_pool::BufferPool,
    factory::{DemuxerFactory, MediaFactory},
    io::MemoryIoHandler,
};

fuzz_target!(|data: &[u8]| {
    let mut io = MemoryIoHandler::new(data.to_vec());
    let _ = MediaFactory::detect_by_magic(&mut io);

    let Ok(demuxer) = DemuxerFactory::create_demuxer(
        Box::new(MemoryIoHandler::new(data.to_vec())),
        Arc::new(BufferPool::default()),
    ) else {
        return;
    };
    if !demuxer.parse_container() {
        return;
    }
    for _ in 0..1024 {
        if !demuxer.read_chunk().is_valid() {
            break;
        }
    }
    let _ = demuxer.seek_to(0);
    let _ = demuxer.read_chunk();
});
