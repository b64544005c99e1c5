//! Ogg に格納される各コーデックの識別ヘッダーとコメントヘッダー
use crate::{
    CodecType, Decode, Error, Le, Result,
    flac::{MetadataBlockHeader, StreamInfoBlock, VorbisComment},
};

/// Ogg 論理ストリームのコーデック
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OggCodec {
    Vorbis,
    Opus,
    Flac,
    Speex,
    Theora,
    #[default]
    Unknown,
}

impl OggCodec {
    /// ストリームの最初のパケットからコーデックを判定する
    pub fn identify(packet: &[u8]) -> Self {
        if packet.len() >= 7 && packet[0] == 0x01 && &packet[1..7] == b"vorbis" {
            Self::Vorbis
        } else if packet.starts_with(b"OpusHead") {
            Self::Opus
        } else if packet.len() >= 5 && packet[0] == 0x7F && &packet[1..5] == b"FLAC" {
            Self::Flac
        } else if packet.starts_with(b"Speex   ") {
            Self::Speex
        } else if packet.len() >= 7 && packet[0] == 0x80 && &packet[1..7] == b"theora" {
            Self::Theora
        } else {
            Self::Unknown
        }
    }

    /// コーデック名
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vorbis => "vorbis",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Speex => "speex",
            Self::Theora => "theora",
            Self::Unknown => "unknown",
        }
    }

    /// ストリームの種類
    pub const fn codec_type(self) -> CodecType {
        match self {
            Self::Theora => CodecType::Video,
            _ => CodecType::Audio,
        }
    }
}

/// 識別ヘッダーから取り出したストリームのパラメータ
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentificationHeader {
    /// コーデック
    pub codec: OggCodec,

    /// サンプリングレート（Opus では常に 48000）
    pub sample_rate: u32,

    /// チャンネル数
    pub channels: u16,

    /// サンプルあたりのビット数（わかる場合のみ）
    pub bits_per_sample: u16,

    /// 公称ビットレート（わかる場合のみ）
    pub bitrate: u32,

    /// Opus のプリスキップ
    pub pre_skip: u64,

    /// ヘッダーに記載された総サンプル数（不明な場合は 0）
    pub total_samples: u64,

    /// データパケットより前に置かれるヘッダーパケットの数
    ///
    /// FLAC でヘッダー数が宣言されていない場合は 0 となり、
    /// その場合は [`is_header_packet()`] で判定する
    pub header_packets: usize,

    /// デコーダーに渡す設定データ
    pub codec_data: Vec<u8>,
}

impl IdentificationHeader {
    /// 最初のパケットを解釈する
    ///
    /// 未知のコーデックの場合もエラーにはせず、ヘッダー数 1 のストリームとして扱う
    pub fn parse(packet: &[u8]) -> Result<Self> {
        match OggCodec::identify(packet) {
            OggCodec::Vorbis => parse_vorbis(packet),
            OggCodec::Opus => parse_opus(packet),
            OggCodec::Flac => parse_flac(packet),
            OggCodec::Speex => parse_speex(packet),
            OggCodec::Theora => parse_theora(packet),
            OggCodec::Unknown => Ok(Self {
                header_packets: 1,
                ..Self::default()
            }),
        }
    }
}

fn parse_vorbis(packet: &[u8]) -> Result<IdentificationHeader> {
    if packet.len() < 30 {
        return Err(Error::invalid_data(format!(
            "Too short Vorbis identification header: {} bytes",
            packet.len()
        )));
    }
    let mut offset = 7;
    let version = Le::<u32>::decode_at(packet, &mut offset)?.get();
    let channels = u8::decode_at(packet, &mut offset)?;
    let sample_rate = Le::<u32>::decode_at(packet, &mut offset)?.get();
    let _bitrate_maximum = Le::<u32>::decode_at(packet, &mut offset)?.get();
    // 0 以下は未設定
    let bitrate_nominal = Le::<u32>::decode_at(packet, &mut offset)?.get() as i32;

    if version != 0 {
        return Err(Error::unsupported(format!(
            "Unsupported Vorbis version: {version}"
        )));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(Error::invalid_data(
            "Vorbis identification header has zero channels or sample rate",
        ));
    }

    Ok(IdentificationHeader {
        codec: OggCodec::Vorbis,
        sample_rate,
        channels: channels as u16,
        bitrate: bitrate_nominal.max(0) as u32,
        header_packets: 3,
        codec_data: packet.to_vec(),
        ..IdentificationHeader::default()
    })
}

fn parse_opus(packet: &[u8]) -> Result<IdentificationHeader> {
    if packet.len() < 19 {
        return Err(Error::invalid_data(format!(
            "Too short OpusHead: {} bytes",
            packet.len()
        )));
    }
    let version = packet[8];
    if version >> 4 != 0 {
        return Err(Error::unsupported(format!(
            "Unsupported OpusHead version: {version}"
        )));
    }
    let channels = packet[9];
    let mut offset = 10;
    let pre_skip = Le::<u16>::decode_at(packet, &mut offset)?.get();
    if channels == 0 {
        return Err(Error::invalid_data("OpusHead has zero channels"));
    }

    Ok(IdentificationHeader {
        codec: OggCodec::Opus,
        sample_rate: 48000,
        channels: channels as u16,
        pre_skip: pre_skip as u64,
        header_packets: 2,
        codec_data: packet.to_vec(),
        ..IdentificationHeader::default()
    })
}

fn parse_flac(packet: &[u8]) -> Result<IdentificationHeader> {
    // 0x7F "FLAC" major minor headers(2) "fLaC" block-header(4) STREAMINFO(34)
    if packet.len() < 51 {
        return Err(Error::invalid_data(format!(
            "Too short FLAC-in-Ogg identification header: {} bytes",
            packet.len()
        )));
    }
    let major = packet[5];
    if major != 1 {
        return Err(Error::unsupported(format!(
            "Unsupported FLAC-in-Ogg mapping version: {major}"
        )));
    }
    let mut offset = 7;
    let declared_headers = u16::decode_at(packet, &mut offset)?;
    if packet[9..13] != crate::flac::FLAC_MARKER {
        return Err(Error::invalid_data("Missing fLaC marker in FLAC-in-Ogg header"));
    }
    let (block, _) = MetadataBlockHeader::decode(&packet[13..])?;
    if block.block_type != MetadataBlockHeader::BLOCK_TYPE_STREAMINFO {
        return Err(Error::invalid_data(
            "First FLAC-in-Ogg metadata block is not STREAMINFO",
        ));
    }
    let (info, _) = StreamInfoBlock::decode(&packet[17..])?;

    Ok(IdentificationHeader {
        codec: OggCodec::Flac,
        sample_rate: info.sample_rate,
        channels: info.channels as u16,
        bits_per_sample: info.bits_per_sample as u16,
        total_samples: info.total_samples,
        header_packets: if declared_headers == 0 {
            0
        } else {
            1 + declared_headers as usize
        },
        codec_data: packet[17..51].to_vec(),
        ..IdentificationHeader::default()
    })
}

fn parse_speex(packet: &[u8]) -> Result<IdentificationHeader> {
    if packet.len() < 80 {
        return Err(Error::invalid_data(format!(
            "Too short Speex header: {} bytes",
            packet.len()
        )));
    }
    let mut offset = 36;
    let sample_rate = Le::<u32>::decode_at(packet, &mut offset)?.get();
    offset = 48;
    let channels = Le::<u32>::decode_at(packet, &mut offset)?.get();
    let bitrate = Le::<u32>::decode_at(packet, &mut offset)?.get();
    offset = 68;
    let extra_headers = Le::<u32>::decode_at(packet, &mut offset)?.get();

    if sample_rate == 0 || channels == 0 || channels > 2 {
        return Err(Error::invalid_data(format!(
            "Invalid Speex header: rate={sample_rate}, channels={channels}"
        )));
    }

    Ok(IdentificationHeader {
        codec: OggCodec::Speex,
        sample_rate,
        channels: channels as u16,
        // -1 は不明を示す
        bitrate: if bitrate == u32::MAX { 0 } else { bitrate },
        header_packets: 2 + extra_headers.min(16) as usize,
        codec_data: packet.to_vec(),
        ..IdentificationHeader::default()
    })
}

fn parse_theora(packet: &[u8]) -> Result<IdentificationHeader> {
    if packet.len() < 42 {
        return Err(Error::invalid_data(format!(
            "Too short Theora identification header: {} bytes",
            packet.len()
        )));
    }
    Ok(IdentificationHeader {
        codec: OggCodec::Theora,
        header_packets: 3,
        codec_data: packet.to_vec(),
        ..IdentificationHeader::default()
    })
}

/// 識別ヘッダーの後に続くパケットがヘッダーかどうかを判定する
///
/// ヘッダー数が宣言されていない FLAC ストリームで使う
pub fn is_header_packet(codec: OggCodec, packet: &[u8]) -> bool {
    match codec {
        OggCodec::Flac => packet.first().is_some_and(|&b| b != 0xFF),
        _ => false,
    }
}

/// コメントヘッダーを解釈する
///
/// コメントヘッダーでないパケットや壊れたパケットに対しては [`None`] を返す
pub fn parse_comment_packet(codec: OggCodec, packet: &[u8]) -> Option<VorbisComment> {
    let body = match codec {
        OggCodec::Vorbis if packet.len() >= 7 && packet[0] == 0x03 && &packet[1..7] == b"vorbis" => {
            &packet[7..]
        }
        OggCodec::Opus if packet.starts_with(b"OpusTags") => &packet[8..],
        OggCodec::Flac
            if packet.first().map(|b| b & 0x7F)
                == Some(MetadataBlockHeader::BLOCK_TYPE_VORBIS_COMMENT) =>
        {
            packet.get(MetadataBlockHeader::SIZE..)?
        }
        OggCodec::Speex => packet,
        OggCodec::Theora if packet.len() >= 7 && packet[0] == 0x81 && &packet[1..7] == b"theora" => {
            &packet[7..]
        }
        _ => return None,
    };
    match VorbisComment::decode(body) {
        Ok((comment, _)) => Some(comment),
        Err(e) => {
            log::debug!("Ignoring malformed {} comment header: {}", codec.name(), e.reason);
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn vorbis_ident(channels: u8, rate: u32) -> Vec<u8> {
        let mut b = vec![0x01];
        b.extend_from_slice(b"vorbis");
        b.extend_from_slice(&0u32.to_le_bytes());
        b.push(channels);
        b.extend_from_slice(&rate.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&128000u32.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.push(0xB8);
        b.push(0x01);
        b
    }

    pub(crate) fn opus_head(channels: u8, pre_skip: u16) -> Vec<u8> {
        let mut b = b"OpusHead".to_vec();
        b.push(1);
        b.push(channels);
        b.extend_from_slice(&pre_skip.to_le_bytes());
        b.extend_from_slice(&48000u32.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.push(0);
        b
    }

    #[test]
    fn identify_codecs() {
        assert_eq!(OggCodec::identify(&vorbis_ident(2, 44100)), OggCodec::Vorbis);
        assert_eq!(OggCodec::identify(&opus_head(2, 312)), OggCodec::Opus);
        assert_eq!(OggCodec::identify(b"\x7fFLAC\x01\x00"), OggCodec::Flac);
        assert_eq!(OggCodec::identify(b"Speex   1.2"), OggCodec::Speex);
        assert_eq!(OggCodec::identify(b"\x80theora"), OggCodec::Theora);
        assert_eq!(OggCodec::identify(b"whatever"), OggCodec::Unknown);
        assert_eq!(OggCodec::Theora.codec_type(), CodecType::Video);
    }

    #[test]
    fn parse_vorbis_header() {
        let h = IdentificationHeader::parse(&vorbis_ident(2, 44100)).unwrap();
        assert_eq!(h.sample_rate, 44100);
        assert_eq!(h.channels, 2);
        assert_eq!(h.bitrate, 128000);
        assert_eq!(h.header_packets, 3);

        assert!(IdentificationHeader::parse(&vorbis_ident(2, 44100)[..29]).is_err());
        assert!(IdentificationHeader::parse(&vorbis_ident(0, 44100)).is_err());
    }

    #[test]
    fn unset_vorbis_bitrate_is_zero() {
        let mut b = vorbis_ident(2, 44100);
        for nominal in [-1i32, i32::MIN, 0] {
            b[20..24].copy_from_slice(&nominal.to_le_bytes());
            let h = IdentificationHeader::parse(&b).unwrap();
            assert_eq!(h.bitrate, 0, "nominal={nominal}");
        }
    }

    #[test]
    fn parse_opus_header() {
        let h = IdentificationHeader::parse(&opus_head(1, 312)).unwrap();
        assert_eq!(h.sample_rate, 48000);
        assert_eq!(h.pre_skip, 312);
        assert_eq!(h.header_packets, 2);
    }

    #[test]
    fn parse_flac_header() {
        let mut b = vec![0x7F];
        b.extend_from_slice(b"FLAC");
        b.extend_from_slice(&[1, 0]);
        b.extend_from_slice(&1u16.to_be_bytes());
        b.extend_from_slice(b"fLaC");
        b.extend_from_slice(&[0x00, 0, 0, 34]);
        b.extend_from_slice(&crate::flac::tests::streaminfo_bytes(4096, 48000, 2, 24, 96000));
        let h = IdentificationHeader::parse(&b).unwrap();
        assert_eq!(h.sample_rate, 48000);
        assert_eq!(h.bits_per_sample, 24);
        assert_eq!(h.total_samples, 96000);
        assert_eq!(h.header_packets, 2);
        assert_eq!(h.codec_data.len(), 34);
    }

    #[test]
    fn parse_comments() {
        let mut b = b"OpusTags".to_vec();
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&1u32.to_le_bytes());
        b.extend_from_slice(&9u32.to_le_bytes());
        b.extend_from_slice(b"ALBUM=Foo");
        let vc = parse_comment_packet(OggCodec::Opus, &b).unwrap();
        assert_eq!(vc.get("album"), Some("Foo"));

        assert!(parse_comment_packet(OggCodec::Vorbis, &b).is_none());
        assert!(parse_comment_packet(OggCodec::Opus, b"OpusTags\xff").is_none());
    }
}
