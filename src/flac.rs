//! FLAC のメタデータブロックとフレームヘッダー
use crate::{Decode, Error, Le, Result, StreamInfo};

/// ストリーム先頭のマーカー
pub const FLAC_MARKER: [u8; 4] = *b"fLaC";

/// メタデータブロックのヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataBlockHeader {
    /// 最後のメタデータブロックかどうか
    pub is_last: bool,

    /// ブロック種別
    pub block_type: u8,

    /// ペイロードのバイト数
    pub length: u32,
}

#[allow(missing_docs)]
impl MetadataBlockHeader {
    pub const SIZE: usize = 4;

    pub const BLOCK_TYPE_STREAMINFO: u8 = 0;
    pub const BLOCK_TYPE_PADDING: u8 = 1;
    pub const BLOCK_TYPE_APPLICATION: u8 = 2;
    pub const BLOCK_TYPE_SEEKTABLE: u8 = 3;
    pub const BLOCK_TYPE_VORBIS_COMMENT: u8 = 4;
    pub const BLOCK_TYPE_CUESHEET: u8 = 5;
    pub const BLOCK_TYPE_PICTURE: u8 = 6;
    pub const BLOCK_TYPE_FORBIDDEN: u8 = 127;
}

impl Decode for MetadataBlockHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(Self::SIZE, buf)?;
        let block_type = buf[0] & 0x7F;
        if block_type == Self::BLOCK_TYPE_FORBIDDEN {
            return Err(Error::invalid_data("Forbidden FLAC metadata block type 127"));
        }
        let this = Self {
            is_last: buf[0] & 0x80 != 0,
            block_type,
            length: u32::from_be_bytes([0, buf[1], buf[2], buf[3]]),
        };
        Ok((this, Self::SIZE))
    }
}

/// STREAMINFO メタデータブロック
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StreamInfoBlock {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,

    /// 不明な場合は 0
    pub total_samples: u64,
    pub md5: [u8; 16],
}

impl StreamInfoBlock {
    /// ブロックのバイト数
    pub const SIZE: usize = 34;

    /// 固定ブロックサイズ方式のストリームかどうか
    pub fn is_fixed_block_size(&self) -> bool {
        self.min_block_size == self.max_block_size
    }
}

impl Decode for StreamInfoBlock {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < Self::SIZE {
            return Err(Error::truncated(format!(
                "Too short STREAMINFO block: {} bytes",
                buf.len()
            )));
        }

        let mut offset = 0;
        let min_block_size = u16::decode_at(buf, &mut offset)?;
        let max_block_size = u16::decode_at(buf, &mut offset)?;
        let min_frame_size = u32::from_be_bytes([0, buf[4], buf[5], buf[6]]);
        let max_frame_size = u32::from_be_bytes([0, buf[7], buf[8], buf[9]]);
        offset = 10;

        // sample rate (20) / channels - 1 (3) / bits per sample - 1 (5) / total samples (36)
        let packed = u64::decode_at(buf, &mut offset)?;
        let sample_rate = (packed >> 44) as u32;
        let channels = ((packed >> 41) & 0x7) as u8 + 1;
        let bits_per_sample = ((packed >> 36) & 0x1F) as u8 + 1;
        let total_samples = packed & 0xF_FFFF_FFFF;
        let md5 = <[u8; 16]>::decode_at(buf, &mut offset)?;

        if sample_rate == 0 {
            return Err(Error::invalid_data("STREAMINFO sample rate is zero"));
        }
        if max_block_size < min_block_size {
            return Err(Error::invalid_data(format!(
                "STREAMINFO max block size ({max_block_size}) is smaller than min block size ({min_block_size})"
            )));
        }

        let this = Self {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
            md5,
        };
        Ok((this, offset))
    }
}

/// SEEKTABLE のシークポイント
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct SeekPoint {
    pub sample_number: u64,

    /// 最初のフレームの先頭からのバイトオフセット
    pub stream_offset: u64,
    pub frame_samples: u16,
}

impl SeekPoint {
    /// シークポイントひとつのバイト数
    pub const SIZE: usize = 18;

    /// 位置を持たないプレースホルダーを示すサンプル番号
    pub const PLACEHOLDER: u64 = u64::MAX;
}

/// SEEKTABLE のペイロードをデコードする
///
/// プレースホルダーは取り除かれ、サンプル番号順に並んだ結果が返される
pub fn decode_seek_table(payload: &[u8]) -> Result<Vec<SeekPoint>> {
    if payload.len() % SeekPoint::SIZE != 0 {
        return Err(Error::invalid_data(format!(
            "SEEKTABLE length {} is not a multiple of {}",
            payload.len(),
            SeekPoint::SIZE
        )));
    }

    let mut points = Vec::with_capacity(payload.len() / SeekPoint::SIZE);
    let mut offset = 0;
    while offset < payload.len() {
        let point = SeekPoint {
            sample_number: u64::decode_at(payload, &mut offset)?,
            stream_offset: u64::decode_at(payload, &mut offset)?,
            frame_samples: u16::decode_at(payload, &mut offset)?,
        };
        if point.sample_number != SeekPoint::PLACEHOLDER {
            points.push(point);
        }
    }
    points.sort_by_key(|p| p.sample_number);
    Ok(points)
}

/// Vorbis comment（FLAC と Ogg で共通のタグ形式）
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VorbisComment {
    /// エンコーダーの識別文字列
    pub vendor: String,

    /// `KEY=value` 形式のコメント列
    pub comments: Vec<(String, String)>,
}

impl VorbisComment {
    /// 指定のキーに対応する最初の値を返す（キーの大文字小文字は区別しない）
    pub fn get(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// アーティスト・タイトル・アルバムをストリーム情報に反映する
    pub fn apply_to(&self, info: &mut StreamInfo) {
        if let Some(v) = self.get("ARTIST") {
            info.artist = v.to_owned();
        }
        if let Some(v) = self.get("TITLE") {
            info.title = v.to_owned();
        }
        if let Some(v) = self.get("ALBUM") {
            info.album = v.to_owned();
        }
    }
}

impl Decode for VorbisComment {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let vendor = decode_le_string(buf, &mut offset)?;
        let count = Le::<u32>::decode_at(buf, &mut offset)?.get() as usize;
        if count > (buf.len() - offset) / 4 {
            return Err(Error::invalid_data(format!(
                "Too many Vorbis comments declared: {count}"
            )));
        }

        let mut comments = Vec::with_capacity(count);
        for _ in 0..count {
            let comment = decode_le_string(buf, &mut offset)?;
            if let Some((k, v)) = comment.split_once('=') {
                comments.push((k.to_owned(), v.to_owned()));
            }
        }
        Ok((Self { vendor, comments }, offset))
    }
}

fn decode_le_string(buf: &[u8], offset: &mut usize) -> Result<String> {
    let len = Le::<u32>::decode_at(buf, offset)?.get() as usize;
    let Some(bytes) = buf.get(*offset..).and_then(|b| b.get(..len)) else {
        return Err(Error::truncated(format!(
            "Vorbis comment string length {len} exceeds the remaining bytes"
        )));
    };
    *offset += len;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// フレームヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 可変ブロックサイズ方式かどうか
    pub variable_block_size: bool,

    /// フレーム内のサンプル数
    pub block_size: u32,

    /// サンプリングレート（0 の場合は STREAMINFO の値を使う）
    pub sample_rate: u32,

    /// チャンネル数
    pub channels: u8,

    /// サンプルあたりのビット数（0 の場合は STREAMINFO の値を使う）
    pub bits_per_sample: u8,

    /// 固定方式ならフレーム番号、可変方式なら先頭サンプル番号
    pub coded_number: u64,

    /// CRC-8 を含むヘッダーのバイト数
    pub header_size: usize,
}

impl FrameHeader {
    /// フレームヘッダーの最大バイト数
    pub const MAX_SIZE: usize = 16;

    /// 同期コードの候補かどうか（`0xFFF8` か `0xFFF9`）
    pub fn is_sync(buf: &[u8]) -> bool {
        buf.len() >= 2 && buf[0] == 0xFF && (buf[1] & 0xFE) == 0xF8
    }

    /// フレームの先頭サンプル番号を返す
    ///
    /// 固定方式の場合は `fixed_block_size`（STREAMINFO の最大ブロックサイズ）を使って計算する
    pub fn first_sample(&self, fixed_block_size: u32) -> u64 {
        if self.variable_block_size {
            self.coded_number
        } else {
            self.coded_number * fixed_block_size as u64
        }
    }

    /// バイト列の先頭からフレームヘッダーを解釈する
    ///
    /// 予約されたビットパターンや CRC-8 の不一致があればエラーを返す。
    /// 判定に必要なバイトが不足している場合のエラー種別は [`ErrorKind::InsufficientBuffer`](crate::ErrorKind::InsufficientBuffer) となる。
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Error::check_buffer_size(4, buf)?;
        if !Self::is_sync(buf) {
            return Err(Error::invalid_data("Missing FLAC frame sync code"));
        }
        let variable_block_size = buf[1] & 0x01 != 0;
        let block_size_bits = buf[2] >> 4;
        let sample_rate_bits = buf[2] & 0x0F;
        let channel_bits = buf[3] >> 4;
        let bit_depth_bits = (buf[3] >> 1) & 0x07;

        if block_size_bits == 0 {
            return Err(Error::invalid_data("Reserved FLAC block size code"));
        }
        if sample_rate_bits == 0x0F {
            return Err(Error::invalid_data("Forbidden FLAC sample rate code"));
        }
        if channel_bits >= 0x0B {
            return Err(Error::invalid_data("Reserved FLAC channel assignment"));
        }
        if bit_depth_bits == 0x03 {
            return Err(Error::invalid_data("Reserved FLAC bit depth code"));
        }
        if buf[3] & 0x01 != 0 {
            return Err(Error::invalid_data("FLAC frame header reserved bit is set"));
        }

        let mut offset = 4;
        let coded_number = decode_coded_number(buf, &mut offset, variable_block_size)?;

        let block_size = match block_size_bits {
            0x01 => 192,
            0x02..=0x05 => 576 << (block_size_bits - 2),
            0x06 => u8::decode_at(buf, &mut offset)? as u32 + 1,
            0x07 => u16::decode_at(buf, &mut offset)? as u32 + 1,
            _ => 256 << (block_size_bits - 8),
        };
        let sample_rate = match sample_rate_bits {
            0x00 => 0,
            0x01 => 88200,
            0x02 => 176400,
            0x03 => 192000,
            0x04 => 8000,
            0x05 => 16000,
            0x06 => 22050,
            0x07 => 24000,
            0x08 => 32000,
            0x09 => 44100,
            0x0A => 48000,
            0x0B => 96000,
            0x0C => u8::decode_at(buf, &mut offset)? as u32 * 1000,
            0x0D => u16::decode_at(buf, &mut offset)? as u32,
            _ => u16::decode_at(buf, &mut offset)? as u32 * 10,
        };
        let channels = match channel_bits {
            0x00..=0x07 => channel_bits + 1,
            _ => 2,
        };
        let bits_per_sample = match bit_depth_bits {
            0x00 => 0,
            0x01 => 8,
            0x02 => 12,
            0x04 => 16,
            0x05 => 20,
            0x06 => 24,
            _ => 32,
        };

        let crc = u8::decode_at(buf, &mut offset)?;
        let expected = crc8(&buf[..offset - 1]);
        if crc != expected {
            return Err(Error::invalid_data(format!(
                "FLAC frame header CRC-8 mismatch: expected {expected:#04x}, got {crc:#04x}"
            )));
        }

        Ok(Self {
            variable_block_size,
            block_size,
            sample_rate,
            channels,
            bits_per_sample,
            coded_number,
            header_size: offset,
        })
    }

    /// STREAMINFO と矛盾しないかどうか
    pub fn is_consistent_with(&self, info: &StreamInfoBlock) -> bool {
        (self.sample_rate == 0 || self.sample_rate == info.sample_rate)
            && self.channels == info.channels
            && (self.bits_per_sample == 0 || self.bits_per_sample == info.bits_per_sample)
            && self.block_size <= info.max_block_size.max(16) as u32
    }
}

/// UTF-8 と同じ方式で可変長に符号化された数値をデコードする
fn decode_coded_number(buf: &[u8], offset: &mut usize, variable: bool) -> Result<u64> {
    let first = u8::decode_at(buf, offset)?;
    let (mut value, extra) = match first.leading_ones() {
        0 => (first as u64, 0),
        2 => ((first & 0x1F) as u64, 1),
        3 => ((first & 0x0F) as u64, 2),
        4 => ((first & 0x07) as u64, 3),
        5 => ((first & 0x03) as u64, 4),
        6 => ((first & 0x01) as u64, 5),
        7 => (0, 6),
        _ => return Err(Error::invalid_data("Invalid FLAC coded number")),
    };
    // 固定方式のフレーム番号は 31 ビットまで
    if !variable && extra > 5 {
        return Err(Error::invalid_data("FLAC frame number is too large"));
    }
    for _ in 0..extra {
        let b = u8::decode_at(buf, offset)?;
        if b & 0xC0 != 0x80 {
            return Err(Error::invalid_data("Invalid FLAC coded number continuation"));
        }
        value = (value << 6) | (b & 0x3F) as u64;
    }
    Ok(value)
}

/// 多項式 0x07 の CRC-8
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// 先頭に ID3v2 タグがある場合、そのタグ全体のバイト数を返す
pub fn id3v2_tag_size(header: &[u8]) -> Option<u64> {
    if header.len() < 10 || &header[..3] != b"ID3" {
        return None;
    }
    let size_bytes = &header[6..10];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = size_bytes
        .iter()
        .fold(0u64, |acc, &b| (acc << 7) | b as u64);
    let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
    Some(10 + size + footer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// テスト用の STREAMINFO のペイロードを組み立てる
    pub(crate) fn streaminfo_bytes(
        block_size: u16,
        sample_rate: u32,
        channels: u8,
        bits: u8,
        total_samples: u64,
    ) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&block_size.to_be_bytes());
        b.extend_from_slice(&block_size.to_be_bytes());
        b.extend_from_slice(&[0; 6]);
        let packed = ((sample_rate as u64) << 44)
            | (((channels - 1) as u64) << 41)
            | (((bits - 1) as u64) << 36)
            | total_samples;
        b.extend_from_slice(&packed.to_be_bytes());
        b.extend_from_slice(&[0; 16]);
        b
    }

    /// 固定ブロックサイズ (4096) / 44100 Hz / ステレオ / 16 ビットのフレームヘッダーを組み立てる
    pub(crate) fn frame_header_bytes(frame_number: u8) -> Vec<u8> {
        assert!(frame_number < 0x80);
        let mut b = vec![0xFF, 0xF8, 0xC9, 0x18, frame_number];
        b.push(crc8(&b));
        b
    }

    #[test]
    fn decode_streaminfo() {
        let bytes = streaminfo_bytes(4096, 44100, 2, 16, 441000);
        let (info, size) = StreamInfoBlock::decode(&bytes).unwrap();
        assert_eq!(size, StreamInfoBlock::SIZE);
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, 441000);
        assert!(info.is_fixed_block_size());

        assert!(StreamInfoBlock::decode(&bytes[..33]).is_err());
        assert!(StreamInfoBlock::decode(&streaminfo_bytes(4096, 0, 2, 16, 0)).is_err());
    }

    #[test]
    fn parse_frame_header() {
        let bytes = frame_header_bytes(3);
        let header = FrameHeader::parse(&bytes).unwrap();
        assert!(!header.variable_block_size);
        assert_eq!(header.block_size, 4096);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.coded_number, 3);
        assert_eq!(header.header_size, 6);
        assert_eq!(header.first_sample(4096), 3 * 4096);
    }

    #[test]
    fn frame_header_rejects_false_sync() {
        let mut bytes = frame_header_bytes(0);
        *bytes.last_mut().unwrap() ^= 0xFF;
        assert!(FrameHeader::parse(&bytes).is_err());

        // 予約済みのブロックサイズコード
        let mut bytes = vec![0xFF, 0xF8, 0x09, 0x18, 0x00];
        bytes.push(crc8(&bytes));
        assert!(FrameHeader::parse(&bytes).is_err());

        assert!(FrameHeader::parse(&[0xFF, 0xFA, 0xC9, 0x18, 0, 0]).is_err());
        assert_eq!(
            FrameHeader::parse(&[0xFF, 0xF8]).unwrap_err().kind,
            crate::ErrorKind::InsufficientBuffer
        );
    }

    #[test]
    fn crc8_known_value() {
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn seek_table_drops_placeholders() {
        let mut b = Vec::new();
        for (sample, offset) in [(u64::MAX, 0u64), (8192, 300), (0, 0)] {
            b.extend_from_slice(&sample.to_be_bytes());
            b.extend_from_slice(&offset.to_be_bytes());
            b.extend_from_slice(&4096u16.to_be_bytes());
        }
        let points = decode_seek_table(&b).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].sample_number, 0);
        assert_eq!(points[1].stream_offset, 300);

        assert!(decode_seek_table(&b[..17]).is_err());
    }

    #[test]
    fn vorbis_comment_tags() {
        let mut b = Vec::new();
        b.extend_from_slice(&3u32.to_le_bytes());
        b.extend_from_slice(b"enc");
        b.extend_from_slice(&2u32.to_le_bytes());
        for c in ["artist=Someone", "TITLE=Track"] {
            b.extend_from_slice(&(c.len() as u32).to_le_bytes());
            b.extend_from_slice(c.as_bytes());
        }
        let (vc, _) = VorbisComment::decode(&b).unwrap();
        let mut info = StreamInfo::default();
        vc.apply_to(&mut info);
        assert_eq!(vc.vendor, "enc");
        assert_eq!(info.artist, "Someone");
        assert_eq!(info.title, "Track");
        assert!(info.album.is_empty());

        // 宣言されたコメント数が多すぎる
        let mut b = Vec::new();
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(VorbisComment::decode(&b).is_err());
    }

    #[test]
    fn id3v2_size() {
        let header = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 0x01, 0x7F];
        assert_eq!(id3v2_tag_size(&header), Some(10 + 255));
        let mut with_footer = header;
        with_footer[5] = 0x10;
        assert_eq!(id3v2_tag_size(&with_footer), Some(10 + 255 + 10));
        assert_eq!(id3v2_tag_size(b"fLaC\0\0\0\0\0\0"), None);
    }
}
