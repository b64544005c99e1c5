//! 各種ヘッダーパーサーの Property-Based Testing
//!
//! 任意のバイト列を与えてもパニックせず、成功時の消費バイト数が入力長を越えないことを確認する
use proptest::prelude::*;
use shiguredo_demux::{
    BoxHeader, Decode, Encode,
    aiff::{self, CommChunk, SsndHeader},
    boxes::{FtypBox, MoovBox},
    descriptors::EsDescriptor,
    flac::{self, FrameHeader, MetadataBlockHeader, StreamInfoBlock, VorbisComment, crc8},
    ogg::{IdentificationHeader, OggCodec, OggPage, codecs},
    riff::{self, InfoTags, WaveFormat},
};

fn arb_bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max)
}

/// 先頭に固定のプレフィックスを付けたランダムなバイト列
fn with_prefix(prefix: &'static [u8], max: usize) -> impl Strategy<Value = Vec<u8>> {
    arb_bytes(max).prop_map(move |rest| [prefix, &rest].concat())
}

fn check_decode<T: Decode>(data: &[u8]) -> Result<(), TestCaseError> {
    if let Ok((_, consumed)) = T::decode(data) {
        prop_assert!(consumed <= data.len());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// ISO BMFF 系のデコーダー
    #[test]
    fn iso_decoders_never_panic(data in arb_bytes(512)) {
        check_decode::<BoxHeader>(&data)?;
        check_decode::<MoovBox>(&data)?;
        check_decode::<EsDescriptor>(&data)?;
        let _ = FtypBox::decode_payload(&data);
    }

    /// ボックス種別が正しくペイロードがランダムな moov ボックス
    #[test]
    fn moov_with_random_payload(payload in arb_bytes(1024)) {
        let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        data.extend_from_slice(b"moov");
        data.extend(payload);
        check_decode::<MoovBox>(&data)?;
    }

    /// RIFF / AIFF 系のデコーダー
    #[test]
    fn chunk_decoders_never_panic(data in arb_bytes(256), is_aifc in any::<bool>()) {
        check_decode::<riff::ChunkHeader>(&data)?;
        check_decode::<aiff::ChunkHeader>(&data)?;
        check_decode::<SsndHeader>(&data)?;
        let _ = WaveFormat::decode_payload(&data);
        let _ = CommChunk::decode_payload(&data, is_aifc);
        let _ = InfoTags::decode_list_payload(&data);
    }

    /// WAVE_FORMAT_EXTENSIBLE の fmt ペイロード
    #[test]
    fn extensible_wave_format(rest in arb_bytes(64)) {
        let mut data = 0xFFFEu16.to_le_bytes().to_vec();
        data.extend(rest);
        if let Ok(format) = WaveFormat::decode_payload(&data) {
            let _ = format.codec_name();
            let _ = format.effective_format_tag();
        }
    }

    /// FLAC 系のデコーダー
    #[test]
    fn flac_decoders_never_panic(data in arb_bytes(256)) {
        check_decode::<MetadataBlockHeader>(&data)?;
        check_decode::<StreamInfoBlock>(&data)?;
        check_decode::<VorbisComment>(&data)?;
        let _ = flac::decode_seek_table(&data);
        let _ = flac::id3v2_tag_size(&data);
        if let Ok(header) = FrameHeader::parse(&data) {
            prop_assert!(header.header_size <= data.len());
            prop_assert!(header.header_size <= FrameHeader::MAX_SIZE);
        }
    }

    /// 同期コードで始まるフレームヘッダー候補
    #[test]
    fn flac_frame_header_candidates(data in with_prefix(&[0xFF, 0xF8], 16)) {
        if let Ok(header) = FrameHeader::parse(&data) {
            prop_assert!(header.header_size <= data.len());
            prop_assert_eq!(crc8(&data[..header.header_size - 1]), data[header.header_size - 1]);
        }
    }

    /// 正しいフレームヘッダーのどこか一バイトでも変われば拒否される
    #[test]
    fn corrupted_flac_frame_header(position in 0usize..6, mask in 1u8..=255, number in 0u8..0x80) {
        let mut header = vec![0xFF, 0xF8, 0xC9, 0x18, number];
        header.push(crc8(&header));
        prop_assert!(FrameHeader::parse(&header).is_ok());

        header[position] ^= mask;
        prop_assert!(FrameHeader::parse(&header).is_err());
    }

    /// Ogg 系のデコーダー
    #[test]
    fn ogg_decoders_never_panic(data in arb_bytes(512)) {
        check_decode::<OggPage>(&data)?;
        let codec = OggCodec::identify(&data);
        let _ = IdentificationHeader::parse(&data);
        let _ = codecs::is_header_packet(codec, &data);
        let _ = codecs::parse_comment_packet(codec, &data);
    }

    /// キャプチャパターンで始まるページ候補
    #[test]
    fn ogg_page_candidates(data in with_prefix(&OggPage::CAPTURE_PATTERN, 600)) {
        check_decode::<OggPage>(&data)?;
    }

    /// コーデックのマジックで始まる識別ヘッダー候補
    #[test]
    fn identification_header_candidates(
        data in prop_oneof![
            with_prefix(b"\x01vorbis", 64),
            with_prefix(b"OpusHead", 64),
            with_prefix(b"\x7fFLAC", 64),
            with_prefix(b"Speex   ", 96),
        ]
    ) {
        if let Ok(header) = IdentificationHeader::parse(&data) {
            prop_assert!(header.sample_rate > 0);
            prop_assert!(header.channels > 0);
        }
    }

    /// ページの CRC はどのバイトの変化も検出する
    #[test]
    fn corrupted_ogg_page(
        packet in arb_bytes(300),
        granule in 0i64..1_000_000,
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let page = OggPage::from_packets(7, 3, granule, 0, &[&packet], true);
        let mut bytes = page.encode_to_vec().expect("encode Ogg page");
        prop_assert_eq!(OggPage::decode(&bytes).map(|(p, n)| (p.granule_position, n)).ok(), Some((granule, bytes.len())));

        let i = position.index(bytes.len());
        bytes[i] ^= mask;
        prop_assert!(OggPage::decode(&bytes).is_err());
    }
}
