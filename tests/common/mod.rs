//! 結合テスト用のコンテナデータ生成関数
#![allow(dead_code)]

use shiguredo_demux::{Encode, flac::crc8, ogg::OggPage};

/// PCM の WAV ファイル（44 バイトのヘッダー + `data` チャンク）
pub fn wav(sample_rate: u32, channels: u16, bits: u16, data_len: usize) -> Vec<u8> {
    let block_align = channels * bits / 8;
    let mut b = b"RIFF".to_vec();
    b.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
    b.extend_from_slice(b"WAVEfmt ");
    b.extend_from_slice(&16u32.to_le_bytes());
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&channels.to_le_bytes());
    b.extend_from_slice(&sample_rate.to_le_bytes());
    b.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    b.extend_from_slice(&block_align.to_le_bytes());
    b.extend_from_slice(&bits.to_le_bytes());
    b.extend_from_slice(b"data");
    b.extend_from_slice(&(data_len as u32).to_le_bytes());
    b.extend((0..data_len).map(|i| (i % 251) as u8));
    b
}

/// 44100 Hz / ステレオ / 16 ビットの AIFF ファイル
pub fn aiff(frames: u32) -> Vec<u8> {
    let mut comm = Vec::new();
    comm.extend_from_slice(&2u16.to_be_bytes());
    comm.extend_from_slice(&frames.to_be_bytes());
    comm.extend_from_slice(&16u16.to_be_bytes());
    comm.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);

    let mut ssnd = vec![0; 8];
    ssnd.extend((0..frames * 4).map(|i| i as u8));

    let mut body = b"AIFF".to_vec();
    for (id, payload) in [(b"COMM", comm), (b"SSND", ssnd)] {
        body.extend_from_slice(id);
        body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        body.extend_from_slice(&payload);
    }
    let mut b = b"FORM".to_vec();
    b.extend_from_slice(&(body.len() as u32).to_be_bytes());
    b.extend(body);
    b
}

/// ブロックサイズ 4096 / 44100 Hz / ステレオ / 16 ビットの FLAC ファイル
///
/// 各フレームはヘッダーと 100 バイトのダミーデータからなる
pub fn flac(frames: u8) -> Vec<u8> {
    let mut streaminfo = Vec::new();
    streaminfo.extend_from_slice(&4096u16.to_be_bytes());
    streaminfo.extend_from_slice(&4096u16.to_be_bytes());
    streaminfo.extend_from_slice(&[0; 6]);
    let total_samples = 4096 * frames as u64;
    let packed = (44100u64 << 44) | (1u64 << 41) | (15u64 << 36) | total_samples;
    streaminfo.extend_from_slice(&packed.to_be_bytes());
    streaminfo.extend_from_slice(&[0; 16]);

    let mut b = b"fLaC".to_vec();
    b.extend_from_slice(&[0x80, 0, 0, streaminfo.len() as u8]);
    b.extend(streaminfo);
    for n in 0..frames {
        let mut header = vec![0xFF, 0xF8, 0xC9, 0x18, n];
        header.push(crc8(&header));
        b.extend(header);
        b.extend(std::iter::repeat_n(n, 100));
    }
    b
}

/// ひとつのページを組み立てる
pub fn ogg_page(serial: u32, seq: u32, granule: i64, header_type: u8, packets: &[&[u8]]) -> Vec<u8> {
    OggPage::from_packets(serial, seq, granule, header_type, packets, true)
        .encode_to_vec()
        .expect("encode Ogg page")
}

/// Vorbis の識別ヘッダー
pub fn vorbis_ident(channels: u8, rate: u32) -> Vec<u8> {
    let mut b = vec![0x01];
    b.extend_from_slice(b"vorbis");
    b.extend_from_slice(&0u32.to_le_bytes());
    b.push(channels);
    b.extend_from_slice(&rate.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&128000u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&[0xB8, 0x01]);
    b
}

/// Vorbis のコメントヘッダー（コメントなし）
pub fn vorbis_comment() -> Vec<u8> {
    let mut b = b"\x03vorbis".to_vec();
    b.extend_from_slice(&4u32.to_le_bytes());
    b.extend_from_slice(b"test");
    b.extend_from_slice(&0u32.to_le_bytes());
    b
}

/// Opus の識別ヘッダー
pub fn opus_head(channels: u8, pre_skip: u16) -> Vec<u8> {
    let mut b = b"OpusHead".to_vec();
    b.push(1);
    b.push(channels);
    b.extend_from_slice(&pre_skip.to_le_bytes());
    b.extend_from_slice(&48000u32.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.push(0);
    b
}

/// OpusTags ヘッダー
pub fn opus_tags() -> Vec<u8> {
    let mut b = b"OpusTags".to_vec();
    b.extend_from_slice(&4u32.to_le_bytes());
    b.extend_from_slice(b"test");
    b.extend_from_slice(&0u32.to_le_bytes());
    b
}

/// 1 ページに 1 パケットを格納した 44100 Hz の Vorbis ストリーム
///
/// `data_pages` 個のデータページのグラニュール位置は `samples_per_page` ずつ増える
pub fn vorbis_stream(serial: u32, data_pages: u32, samples_per_page: i64) -> Vec<u8> {
    let mut b = ogg_page(serial, 0, 0, OggPage::FLAG_BOS, &[&vorbis_ident(2, 44100)]);
    b.extend(ogg_page(
        serial,
        1,
        0,
        0,
        &[&vorbis_comment(), b"\x05vorbis-setup"],
    ));
    for i in 0..data_pages {
        let flags = if i + 1 == data_pages { OggPage::FLAG_EOS } else { 0 };
        let payload = vec![i as u8; 200];
        b.extend(ogg_page(
            serial,
            i + 2,
            (i as i64 + 1) * samples_per_page,
            flags,
            &[&payload],
        ));
    }
    b
}

/// Opus ストリーム（1 ページ 20 ms）
pub fn opus_stream(serial: u32, pre_skip: u16, data_pages: u32) -> Vec<u8> {
    let mut b = ogg_page(serial, 0, 0, OggPage::FLAG_BOS, &[&opus_head(2, pre_skip)]);
    b.extend(ogg_page(serial, 1, 0, 0, &[&opus_tags()]));
    for i in 0..data_pages {
        let flags = if i + 1 == data_pages { OggPage::FLAG_EOS } else { 0 };
        let granule = pre_skip as i64 + (i as i64 + 1) * 960;
        b.extend(ogg_page(serial, i + 2, granule, flags, &[&[0xFC, i as u8]]));
    }
    b
}

fn bx(ty: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut b = ((8 + payload.len()) as u32).to_be_bytes().to_vec();
    b.extend_from_slice(ty);
    b.extend_from_slice(payload);
    b
}

fn full(ty: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut p = vec![0; 4];
    p.extend_from_slice(payload);
    bx(ty, &p)
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// AAC-LC (44100 Hz / ステレオ) のトラックをひとつ持つ M4A ファイル
///
/// 各フレームは 1024 サンプル、サイズは 200 バイト、1 チャンクに 1 フレームずつ置かれる
pub fn m4a(frames: u32) -> Vec<u8> {
    const FRAME_SIZE: u32 = 200;
    let ftyp = bx(b"ftyp", b"M4A \0\0\0\0M4A mp42isom");
    let mdat_payload: Vec<u8> = (0..frames)
        .flat_map(|i| std::iter::repeat_n(i as u8, FRAME_SIZE as usize))
        .collect();
    let data_offset = ftyp.len() as u32 + 8;

    let asc = [0x12, 0x10];
    let mut dcd = vec![0x40, 0x15, 0, 0, 0];
    dcd.extend_from_slice(&128000u32.to_be_bytes());
    dcd.extend_from_slice(&128000u32.to_be_bytes());
    dcd.extend_from_slice(&[0x05, asc.len() as u8]);
    dcd.extend_from_slice(&asc);
    let mut es = vec![0x00, 0x01, 0x00, 0x04, dcd.len() as u8];
    es.extend(dcd);
    es.extend_from_slice(&[0x06, 0x01, 0x02]);
    let mut esds = vec![0x03, es.len() as u8];
    esds.extend(es);

    let mut mp4a = vec![0; 6];
    mp4a.extend_from_slice(&1u16.to_be_bytes());
    mp4a.extend_from_slice(&[0; 8]);
    mp4a.extend_from_slice(&2u16.to_be_bytes());
    mp4a.extend_from_slice(&16u16.to_be_bytes());
    mp4a.extend_from_slice(&[0; 4]);
    mp4a.extend_from_slice(&(44100u32 << 16).to_be_bytes());
    mp4a.extend(full(b"esds", &esds));

    let mut stsd = u32s(&[1]);
    stsd.extend(bx(b"mp4a", &mp4a));
    let mut stco = u32s(&[frames]);
    stco.extend(u32s(
        &(0..frames)
            .map(|i| data_offset + i * FRAME_SIZE)
            .collect::<Vec<_>>(),
    ));
    let stbl = [
        full(b"stsd", &stsd),
        full(b"stts", &u32s(&[1, frames, 1024])),
        full(b"stsc", &u32s(&[1, 1, 1, 1])),
        full(b"stsz", &u32s(&[FRAME_SIZE, frames])),
        full(b"stco", &stco),
    ]
    .concat();

    let duration = frames * 1024;
    let mut mdhd = u32s(&[0, 0, 44100, duration]);
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);
    let mut hdlr = u32s(&[0]);
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0; 13]);
    let mdia = [
        full(b"mdhd", &mdhd),
        full(b"hdlr", &hdlr),
        bx(b"minf", &bx(b"stbl", &stbl)),
    ]
    .concat();
    let trak = bx(
        b"trak",
        &[full(b"tkhd", &u32s(&[0, 0, 1, 0, duration])), bx(b"mdia", &mdia)].concat(),
    );
    let moov = bx(b"moov", &[full(b"mvhd", &u32s(&[0, 0, 1000, 0])), trak].concat());

    [ftyp, bx(b"mdat", &mdat_payload), moov].concat()
}

/// FLAC-in-Ogg ストリーム（1 ページ 4096 サンプル、44100 Hz / ステレオ / 16 ビット）
///
/// STREAMINFO に総サンプル数を記載し、VORBIS_COMMENT に `TITLE=Tone` を入れる
pub fn ogg_flac_stream(serial: u32, data_pages: u32) -> Vec<u8> {
    let total_samples = 4096 * data_pages as u64;
    let mut ident = vec![0x7F];
    ident.extend_from_slice(b"FLAC");
    ident.extend_from_slice(&[1, 0]);
    ident.extend_from_slice(&1u16.to_be_bytes());
    ident.extend_from_slice(b"fLaC");
    ident.extend_from_slice(&[0x00, 0, 0, 34]);
    ident.extend_from_slice(&4096u16.to_be_bytes());
    ident.extend_from_slice(&4096u16.to_be_bytes());
    ident.extend_from_slice(&[0; 6]);
    let packed = (44100u64 << 44) | (1u64 << 41) | (15u64 << 36) | total_samples;
    ident.extend_from_slice(&packed.to_be_bytes());
    ident.extend_from_slice(&[0; 16]);

    let mut comment_body = 4u32.to_le_bytes().to_vec();
    comment_body.extend_from_slice(b"test");
    comment_body.extend_from_slice(&1u32.to_le_bytes());
    comment_body.extend_from_slice(&10u32.to_le_bytes());
    comment_body.extend_from_slice(b"TITLE=Tone");
    let mut comment = vec![0x84, 0, 0, comment_body.len() as u8];
    comment.extend(comment_body);

    let mut b = ogg_page(serial, 0, 0, OggPage::FLAG_BOS, &[&ident]);
    b.extend(ogg_page(serial, 1, 0, 0, &[&comment]));
    for i in 0..data_pages {
        let flags = if i + 1 == data_pages { OggPage::FLAG_EOS } else { 0 };
        let mut frame = vec![0xFF, 0xF8, 0xC9, 0x18, i as u8];
        frame.push(crc8(&frame));
        frame.extend(std::iter::repeat_n(i as u8, 64));
        let granule = (i as i64 + 1) * 4096;
        b.extend(ogg_page(serial, i + 2, granule, flags, &[&frame]));
    }
    b
}
