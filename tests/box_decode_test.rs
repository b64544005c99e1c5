use shiguredo_demux::{
    BoxHeader, BoxType, Decode, Either, ErrorKind, Result,
    boxes::{Brand, FtypBox, MoovBox, SampleEntry, StszBox, SttsEntry},
};

mod common;

const FRAMES: u32 = 10;

/// 生成した M4A を ftyp / mdat / moov の三つに分ける
fn split_m4a() -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let bytes = common::m4a(FRAMES);
    let mut boxes = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (header, payload) = BoxHeader::decode_header_and_payload(&bytes[offset..])?;
        let size = header.external_size() + payload.len();
        boxes.push(bytes[offset..offset + size].to_vec());
        offset += size;
    }
    assert_eq!(boxes.len(), 3);
    let moov = boxes.pop().unwrap_or_default();
    let mdat = boxes.pop().unwrap_or_default();
    let ftyp = boxes.pop().unwrap_or_default();
    Ok((ftyp, mdat, moov))
}

#[test]
fn decode_m4a_ftyp() -> Result<()> {
    let (ftyp, mdat, _) = split_m4a()?;

    let (ftyp_box, consumed) = FtypBox::decode(&ftyp)?;
    assert_eq!(consumed, ftyp.len());
    assert_eq!(ftyp_box.major_brand, Brand::M4A);
    assert_eq!(ftyp_box.minor_version, 0);
    assert_eq!(
        ftyp_box.brands().collect::<Vec<_>>(),
        [Brand::M4A, Brand::M4A, Brand::MP42, Brand::ISOM]
    );

    let (header, payload) = BoxHeader::decode_header_and_payload(&mdat)?;
    assert_eq!(header.box_type, BoxType::Normal(*b"mdat"));
    assert_eq!(payload.len(), (FRAMES * 200) as usize);
    assert_eq!(header.payload_size(), Some((FRAMES * 200) as u64));
    Ok(())
}

#[test]
fn decode_m4a_moov() -> Result<()> {
    let (ftyp, _, moov) = split_m4a()?;
    let (moov_box, consumed) = MoovBox::decode(&moov)?;
    assert_eq!(consumed, moov.len());

    // デコード時に未処理のボックスがないことを確認する。
    assert!(moov_box.unknown_boxes.is_empty());
    assert_eq!(moov_box.mvhd_box.timescale, 1000);
    assert_eq!(moov_box.trak_boxes.len(), 1);

    let trak = &moov_box.trak_boxes[0];
    assert!(trak.unknown_boxes.is_empty());
    assert_eq!(trak.tkhd_box.track_id, 1);

    let mdia = &trak.mdia_box;
    assert!(mdia.unknown_boxes.is_empty());
    assert_eq!(mdia.mdhd_box.timescale, 44100);
    assert_eq!(mdia.mdhd_box.duration, (FRAMES * 1024) as u64);
    assert_eq!(&mdia.mdhd_box.language, b"und");
    assert_eq!(&mdia.hdlr_box.handler_type, b"soun");

    let stbl = &mdia.minf_box.stbl_box;
    assert!(mdia.minf_box.unknown_boxes.is_empty());
    assert!(stbl.unknown_boxes.is_empty());
    assert!(stbl.stss_box.is_none());
    assert_eq!(
        stbl.stts_box.entries,
        [SttsEntry {
            sample_count: FRAMES,
            sample_delta: 1024
        }]
    );
    assert_eq!(
        stbl.stsz_box,
        StszBox::Fixed {
            sample_size: 200,
            sample_count: FRAMES
        }
    );
    let Either::A(stco) = &stbl.stco_or_co64_box else {
        panic!("expected stco box");
    };
    let first_offset = ftyp.len() as u32 + 8;
    assert_eq!(stco.chunk_offsets.len(), FRAMES as usize);
    assert_eq!(stco.chunk_offsets[0], first_offset);
    assert_eq!(stco.chunk_offsets[9], first_offset + 9 * 200);

    let [SampleEntry::Audio(entry)] = stbl.stsd_box.entries.as_slice() else {
        panic!("expected a single audio sample entry");
    };
    assert_eq!(entry.box_type, BoxType::Normal(*b"mp4a"));
    assert_eq!(entry.audio.channelcount, 2);
    assert_eq!(entry.audio.samplesize, 16);
    assert_eq!(entry.audio.samplerate, 44100);
    assert!(entry.unknown_boxes.is_empty());

    let esds = entry.esds_box.as_ref().expect("esds box");
    let config = &esds.es.dec_config_descr;
    assert!(config.is_aac());
    assert!(!config.is_mp3());
    assert_eq!(config.avg_bitrate, 128000);
    assert_eq!(
        config.dec_specific_info.as_ref().map(|d| d.payload.as_slice()),
        Some(&[0x12, 0x10][..])
    );
    Ok(())
}

#[test]
fn truncated_moov_is_reported() -> Result<()> {
    let (_, _, moov) = split_m4a()?;
    for len in [0, 4, 8, moov.len() / 2, moov.len() - 1] {
        let error = MoovBox::decode(&moov[..len]).expect_err("truncated moov");
        assert_eq!(error.kind, ErrorKind::InsufficientBuffer, "len={len}");
    }
    Ok(())
}

#[test]
fn unexpected_box_type_is_rejected() -> Result<()> {
    let (ftyp, _, _) = split_m4a()?;
    let error = MoovBox::decode(&ftyp).expect_err("not a moov box");
    assert_eq!(error.kind, ErrorKind::InvalidData);
    Ok(())
}
