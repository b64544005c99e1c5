#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use shiguredo_demux::{buffer_pool::BufferPool, demux::IsoDemuxer, io::MemoryIoHandler};

fuzz_target!(|data: &[u8]| {
    let demuxer = IsoDemuxer::new(
        Box::new(MemoryIoHandler::new(data.to_vec())),
        Arc::new(BufferPool::default()),
    );
    if !demuxer.parse_container() {
        return;
    }
    for _ in 0..1024 {
        if !demuxer.read_chunk().is_valid() {
            break;
        }
    }
    let _ = demuxer.seek_to(demuxer.duration() / 2);
    let _ = demuxer.read_chunk();
});
