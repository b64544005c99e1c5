use std::{io::SeekFrom, sync::Arc};

use shiguredo_demux::{
    buffer_pool::BufferPool,
    demux::DemuxerConfig,
    error::ErrorCategory,
    factory::{DemuxerFactory, MediaFactory},
    io::{FileIoHandler, IoHandler},
};

mod common;

#[test]
fn file_handler_contract() -> std::io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("data.bin");
    std::fs::write(&path, (0u8..32).collect::<Vec<_>>())?;

    let mut io = FileIoHandler::open(&path)?;
    assert_eq!(io.file_size(), Some(32));
    assert_eq!(io.read_exact_at(30, 2)?, vec![30, 31]);
    assert!(!io.eof());

    let mut buf = [0u8; 8];
    io.seek(SeekFrom::End(-4))?;
    assert_eq!(io.read(&mut buf)?, 4);
    assert!(io.eof());
    assert_eq!(io.tell(), 32);

    // 範囲外へのシークは失敗し、位置は変わらない
    assert!(io.seek(SeekFrom::Start(33)).is_err());
    assert!(io.seek(SeekFrom::Current(-33)).is_err());
    assert_eq!(io.tell(), 32);

    assert_eq!(io.seek(SeekFrom::Start(0))?, 0);
    assert!(!io.eof());

    io.close()?;
    assert!(io.read(&mut buf).is_err());
    assert!(io.seek(SeekFrom::Start(0)).is_err());
    Ok(())
}

#[test]
fn demux_files_from_disk() -> std::io::Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = Arc::new(BufferPool::default());
    let files = [
        ("tone.wav", common::wav(8000, 1, 16, 8000), "pcm"),
        ("tone.aiff", common::aiff(441), "pcm"),
        ("tone.flac", common::flac(3), "flac"),
        ("tone.opus", common::opus_stream(5, 312, 10), "opus"),
        ("tone.m4a", common::m4a(10), "aac"),
    ];
    for (name, data, codec) in files {
        let path = dir.path().join(name);
        std::fs::write(&path, data)?;

        let demuxer =
            DemuxerFactory::create_demuxer_for_path(&path, pool.clone(), DemuxerConfig::default())
                .expect("recognized container");
        assert!(demuxer.parse_container(), "{name}: {:?}", demuxer.last_error());
        assert_eq!(demuxer.streams()[0].codec_name, codec, "{name}");
        assert!(demuxer.read_chunk().is_valid(), "{name}");

        let info = MediaFactory::analyze_content(path.to_str().expect("utf-8 path"));
        assert!(info.is_detected(), "{name}");
        assert!(info.confidence > 0.9, "{name}");
        assert_eq!(
            info.file_extension,
            name.rsplit('.').next().unwrap_or_default()
        );
    }
    Ok(())
}

#[test]
fn closed_source_reports_io_failure() -> std::io::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tone.wav");
    std::fs::write(&path, common::wav(8000, 1, 16, 64000))?;

    let demuxer = DemuxerFactory::create_demuxer(
        Box::new(FileIoHandler::open(&path)?),
        Arc::new(BufferPool::default()),
    )
    .expect("recognized container");
    assert!(demuxer.parse_container());
    assert!(demuxer.close());

    assert!(!demuxer.read_chunk().is_valid());
    let error = demuxer.last_error().expect("error recorded");
    assert_eq!(error.category, ErrorCategory::IoFailure);
    assert!(!demuxer.is_eof());
    Ok(())
}
