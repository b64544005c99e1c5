//! AIFF / AIFF-C のチャンク構造
//!
//! IFF の数値は全てビッグエンディアンで格納されている
use crate::{Decode, Error, Result};

/// IFF チャンクのヘッダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHeader {
    /// チャンク ID
    pub id: [u8; 4],

    /// ペイロードのバイト数
    pub size: u32,
}

impl ChunkHeader {
    /// ヘッダーのバイト数
    pub const SIZE: usize = 8;

    /// パディングバイトを含めたペイロードのバイト数
    pub fn padded_size(self) -> u64 {
        self.size as u64 + (self.size as u64 & 1)
    }
}

impl Decode for ChunkHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let id = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let size = u32::decode_at(buf, &mut offset)?;
        Ok((Self { id, size }, offset))
    }
}

/// `FORM` チャンクの ID
pub const FORM_ID: [u8; 4] = *b"FORM";

/// 非圧縮の AIFF を示すフォーム種別
pub const AIFF_ID: [u8; 4] = *b"AIFF";

/// AIFF-C を示すフォーム種別
pub const AIFC_ID: [u8; 4] = *b"AIFC";

/// `COMM` チャンクの内容
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct CommChunk {
    pub channels: u16,
    pub sample_frames: u32,
    pub sample_size: u16,
    pub sample_rate: f64,

    /// AIFF-C の場合のみ意味を持つ（AIFF では `NONE`）
    pub compression_type: [u8; 4],
    pub compression_name: String,
}

impl CommChunk {
    /// 非圧縮を示す圧縮種別
    pub const COMPRESSION_NONE: [u8; 4] = *b"NONE";

    /// ペイロードからデコードする
    ///
    /// `is_aifc` が `true` の場合には圧縮種別と圧縮名も読み込む
    pub fn decode_payload(payload: &[u8], is_aifc: bool) -> Result<Self> {
        if payload.len() < 18 {
            return Err(Error::invalid_data(format!(
                "Too short 'COMM' chunk: {} bytes (18 bytes or more required)",
                payload.len()
            )));
        }

        let mut offset = 0;
        let channels = u16::decode_at(payload, &mut offset)?;
        let sample_frames = u32::decode_at(payload, &mut offset)?;
        let sample_size = u16::decode_at(payload, &mut offset)?;
        let sample_rate = decode_extended(<[u8; 10]>::decode_at(payload, &mut offset)?);

        let mut compression_type = Self::COMPRESSION_NONE;
        let mut compression_name = String::new();
        if is_aifc {
            compression_type = <[u8; 4]>::decode_at(payload, &mut offset)?;
            if let Ok(len) = u8::decode_at(payload, &mut offset) {
                let end = (offset + len as usize).min(payload.len());
                compression_name = String::from_utf8_lossy(&payload[offset..end]).into_owned();
            }
        }

        if channels == 0 {
            return Err(Error::invalid_data("Channel count in 'COMM' chunk is zero"));
        }
        if !(sample_rate.is_finite() && sample_rate >= 1.0 && sample_rate <= u32::MAX as f64) {
            return Err(Error::invalid_data(format!(
                "Invalid sample rate in 'COMM' chunk: {sample_rate}"
            )));
        }

        Ok(Self {
            channels,
            sample_frames,
            sample_size,
            sample_rate,
            compression_type,
            compression_name,
        })
    }

    /// 整数に丸めたサンプリングレート
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate.round() as u32
    }

    /// コーデック名を返す
    pub fn codec_name(&self) -> &'static str {
        match &self.compression_type {
            b"NONE" | b"none" | b"sowt" | b"twos" | b"raw " | b"fl32" | b"FL32" | b"fl64"
            | b"FL64" | b"in24" | b"in32" => "pcm",
            b"alaw" | b"ALAW" => "alaw",
            b"ulaw" | b"ULAW" => "ulaw",
            b"ima4" => "adpcm",
            _ => "unknown",
        }
    }

    /// 浮動小数点数のサンプルかどうか
    pub fn is_float(&self) -> bool {
        matches!(&self.compression_type, b"fl32" | b"FL32" | b"fl64" | b"FL64")
    }

    /// サンプルがリトルエンディアンで格納されているかどうか
    pub fn is_little_endian(&self) -> bool {
        &self.compression_type == b"sowt"
    }

    /// 1 サンプルフレームのバイト数（非 PCM の場合は 0）
    pub fn frame_bytes(&self) -> u32 {
        if self.codec_name() != "pcm" {
            return match self.codec_name() {
                "alaw" | "ulaw" => self.channels as u32,
                _ => 0,
            };
        }
        let bits = match &self.compression_type {
            b"fl32" | b"FL32" => 32,
            b"fl64" | b"FL64" => 64,
            _ => self.sample_size as u32,
        };
        bits.div_ceil(8) * self.channels as u32
    }
}

/// `SSND` チャンクの先頭部分
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SsndHeader {
    /// サウンドデータの先頭までのオフセット
    pub offset: u32,

    /// ブロックサイズ（通常は 0）
    pub block_size: u32,
}

impl SsndHeader {
    /// ヘッダーのバイト数
    pub const SIZE: usize = 8;
}

impl Decode for SsndHeader {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let this = Self {
            offset: u32::decode_at(buf, &mut offset)?,
            block_size: u32::decode_at(buf, &mut offset)?,
        };
        Ok((this, offset))
    }
}

/// 80 ビットの IEEE 754 拡張倍精度浮動小数点数を `f64` に変換する
pub fn decode_extended(bytes: [u8; 10]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (u16::from_be_bytes([bytes[0], bytes[1]]) & 0x7FFF) as i32;
    let mut m = [0; 8];
    m.copy_from_slice(&bytes[2..]);
    let mantissa = u64::from_be_bytes(m);

    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    if exponent == 0x7FFF {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }
    sign * (mantissa as f64) * 2f64.powi(exponent - 16383 - 63)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 44100 Hz
    const RATE_44100: [u8; 10] = [0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0];

    fn comm_payload(aifc: bool) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&2u16.to_be_bytes());
        b.extend_from_slice(&1000u32.to_be_bytes());
        b.extend_from_slice(&16u16.to_be_bytes());
        b.extend_from_slice(&RATE_44100);
        if aifc {
            b.extend_from_slice(b"sowt");
            b.push(3);
            b.extend_from_slice(b"abc");
        }
        b
    }

    #[test]
    fn extended_float() {
        assert_eq!(decode_extended(RATE_44100), 44100.0);
        assert_eq!(
            decode_extended([0x40, 0x0B, 0xFA, 0, 0, 0, 0, 0, 0, 0]),
            8000.0
        );
        assert_eq!(decode_extended([0; 10]), 0.0);
    }

    #[test]
    fn decode_aiff_comm() {
        let comm = CommChunk::decode_payload(&comm_payload(false), false).unwrap();
        assert_eq!(comm.sample_rate_hz(), 44100);
        assert_eq!(comm.codec_name(), "pcm");
        assert_eq!(comm.frame_bytes(), 4);
        assert!(!comm.is_little_endian());
    }

    #[test]
    fn decode_aifc_comm() {
        let comm = CommChunk::decode_payload(&comm_payload(true), true).unwrap();
        assert_eq!(&comm.compression_type, b"sowt");
        assert_eq!(comm.compression_name, "abc");
        assert!(comm.is_little_endian());
        assert_eq!(comm.codec_name(), "pcm");
    }

    #[test]
    fn invalid_comm_is_rejected() {
        assert!(CommChunk::decode_payload(&comm_payload(false)[..17], false).is_err());

        let mut b = comm_payload(false);
        b[8..18].copy_from_slice(&[0; 10]);
        assert!(CommChunk::decode_payload(&b, false).is_err());

        let mut b = comm_payload(false);
        b[0..2].copy_from_slice(&[0, 0]);
        assert!(CommChunk::decode_payload(&b, false).is_err());
    }
}
