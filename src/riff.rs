//! RIFF / WAVE のチャンク構造
//!
//! RIFF の数値は全てリトルエンディアンで格納されている
use crate::{Decode, Error, Le, Result};

/// RIFF チャンクのヘッダー（4 文字の ID と 32 ビットの長さ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHeader {
    /// チャンク ID
    pub id: [u8; 4],

    /// ペイロードのバイト数（パディングを含まない）
    pub size: u32,
}

impl ChunkHeader {
    /// ヘッダーのバイト数
    pub const SIZE: usize = 8;

    /// パディングバイトを含めたペイロードのバイト数
    ///
    /// 長さが奇数の場合には偶数境界に揃えるための 1 バイトが後ろに置かれる
    pub fn padded_size(self) -> u64 {
        self.size as u64 + (self.size as u64 & 1)
    }
}

impl Decode for ChunkHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let id = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let size = Le::<u32>::decode_at(buf, &mut offset)?.get();
        Ok((Self { id, size }, offset))
    }
}

/// `RIFF` チャンクの ID
pub const RIFF_ID: [u8; 4] = *b"RIFF";

/// WAVE 形式を示すフォーム種別
pub const WAVE_ID: [u8; 4] = *b"WAVE";

/// WAVE のフォーマットタグ
#[allow(missing_docs)]
pub mod format_tag {
    pub const PCM: u16 = 0x0001;
    pub const MS_ADPCM: u16 = 0x0002;
    pub const IEEE_FLOAT: u16 = 0x0003;
    pub const ALAW: u16 = 0x0006;
    pub const MULAW: u16 = 0x0007;
    pub const IMA_ADPCM: u16 = 0x0011;
    pub const GSM610: u16 = 0x0031;
    pub const MPEG: u16 = 0x0050;
    pub const MPEGLAYER3: u16 = 0x0055;
    pub const WMAV1: u16 = 0x0160;
    pub const WMAV2: u16 = 0x0161;
    pub const WMAPRO: u16 = 0x0162;
    pub const EXTENSIBLE: u16 = 0xFFFE;
}

/// `fmt ` チャンクの内容
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct WaveFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,

    /// `WAVE_FORMAT_EXTENSIBLE` の場合のみ埋まる
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: Option<[u8; 16]>,

    /// cbSize で示される拡張部分のバイト列
    pub extra: Vec<u8>,
}

impl WaveFormat {
    /// `WAVE_FORMAT_EXTENSIBLE` の場合はサブフォーマットから導かれる実際のフォーマットタグを返す
    pub fn effective_format_tag(&self) -> u16 {
        match self.sub_format {
            Some(guid) if self.format_tag == format_tag::EXTENSIBLE => {
                u16::from_le_bytes([guid[0], guid[1]])
            }
            _ => self.format_tag,
        }
    }

    /// コーデック名を返す
    pub fn codec_name(&self) -> &'static str {
        match self.effective_format_tag() {
            format_tag::PCM | format_tag::IEEE_FLOAT => "pcm",
            format_tag::ALAW => "alaw",
            format_tag::MULAW => "ulaw",
            format_tag::MPEGLAYER3 => "mp3",
            format_tag::MPEG => "mp2",
            format_tag::MS_ADPCM | format_tag::IMA_ADPCM => "adpcm",
            format_tag::GSM610 => "gsm",
            format_tag::WMAV1 | format_tag::WMAV2 | format_tag::WMAPRO => "wma",
            _ => "unknown",
        }
    }

    /// 非圧縮 PCM（整数または浮動小数点数）かどうか
    pub fn is_pcm(&self) -> bool {
        matches!(
            self.effective_format_tag(),
            format_tag::PCM | format_tag::IEEE_FLOAT
        )
    }

    /// ペイロード（チャンクヘッダーを除いた部分）からデコードする
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 16 {
            return Err(Error::invalid_data(format!(
                "Too short 'fmt ' chunk: {} bytes (16 bytes or more required)",
                payload.len()
            )));
        }

        let mut offset = 0;
        let mut this = Self {
            format_tag: Le::<u16>::decode_at(payload, &mut offset)?.get(),
            channels: Le::<u16>::decode_at(payload, &mut offset)?.get(),
            sample_rate: Le::<u32>::decode_at(payload, &mut offset)?.get(),
            byte_rate: Le::<u32>::decode_at(payload, &mut offset)?.get(),
            block_align: Le::<u16>::decode_at(payload, &mut offset)?.get(),
            bits_per_sample: Le::<u16>::decode_at(payload, &mut offset)?.get(),
            ..Self::default()
        };

        if payload.len() >= offset + 2 {
            let cb_size = Le::<u16>::decode_at(payload, &mut offset)?.get() as usize;
            let end = (offset + cb_size).min(payload.len());
            this.extra = payload[offset..end].to_vec();
        }

        if this.format_tag == format_tag::EXTENSIBLE {
            if this.extra.len() < 22 {
                return Err(Error::invalid_data(format!(
                    "Too short WAVE_FORMAT_EXTENSIBLE extension: {} bytes",
                    this.extra.len()
                )));
            }
            let mut offset = 0;
            this.valid_bits_per_sample = Le::<u16>::decode_at(&this.extra, &mut offset)?.get();
            this.channel_mask = Le::<u32>::decode_at(&this.extra, &mut offset)?.get();
            this.sub_format = Some(<[u8; 16]>::decode_at(&this.extra, &mut offset)?);
        }

        if this.channels == 0 {
            return Err(Error::invalid_data("Channel count in 'fmt ' chunk is zero"));
        }
        if this.sample_rate == 0 {
            return Err(Error::invalid_data("Sample rate in 'fmt ' chunk is zero"));
        }

        Ok(this)
    }
}

/// `LIST` / `INFO` チャンクから取り出したメタデータ
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InfoTags {
    /// `INAM`
    pub title: String,

    /// `IART`
    pub artist: String,

    /// `IPRD`
    pub album: String,
}

impl InfoTags {
    /// `LIST` チャンクのペイロードを解釈する
    ///
    /// リスト種別が `INFO` 以外の場合や、壊れたサブチャンクが現れた時点で読み込みを打ち切る
    pub fn decode_list_payload(payload: &[u8]) -> Self {
        let mut tags = Self::default();
        if payload.get(..4) != Some(b"INFO".as_slice()) {
            return tags;
        }

        let mut offset = 4;
        while let Ok(header) = ChunkHeader::decode_at(payload, &mut offset) {
            let end = offset + header.size as usize;
            let Some(value) = payload.get(offset..end) else {
                log::warn!("Truncated LIST/INFO sub-chunk: {:?}", header.id);
                break;
            };
            let value = text_value(value);
            match &header.id {
                b"INAM" => tags.title = value,
                b"IART" => tags.artist = value,
                b"IPRD" => tags.album = value,
                _ => {}
            }
            offset = end + (header.size as usize & 1);
        }
        tags
    }
}

/// NUL 終端されていることがあるテキストを文字列に変換する
pub(crate) fn text_value(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}
