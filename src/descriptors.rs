//! ISO_IEC_14496-1 で定義されているディスクリプター群（読み込み側のみ）
use crate::{Decode, Error, Result, Uint};

/// [ISO_IEC_14496-1] ES_Descriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub stream_priority: Uint<u8, 5>,
    pub depends_on_es_id: Option<u16>,
    pub url_string: Option<String>,
    pub ocr_es_id: Option<u16>,
    pub dec_config_descr: DecoderConfigDescriptor,
}

impl EsDescriptor {
    const TAG: u8 = 3; // ES_DescrTag
}

impl Decode for EsDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_tagged_payload(buf, Self::TAG)?;
        let mut offset = 0;

        let es_id = u16::decode_at(payload, &mut offset)?;

        let b = u8::decode_at(payload, &mut offset)?;
        let stream_dependence_flag: Uint<u8, 1, 7> = Uint::from_bits(b);
        let url_flag: Uint<u8, 1, 6> = Uint::from_bits(b);
        let ocr_stream_flag: Uint<u8, 1, 5> = Uint::from_bits(b);
        let stream_priority = Uint::from_bits(b);

        let depends_on_es_id = if stream_dependence_flag.get() == 1 {
            Some(u16::decode_at(payload, &mut offset)?)
        } else {
            None
        };

        let url_string = if url_flag.get() == 1 {
            let len = u8::decode_at(payload, &mut offset)? as usize;
            Error::check_buffer_size(offset + len, payload)?;
            let s = String::from_utf8_lossy(&payload[offset..offset + len]).into_owned();
            offset += len;
            Some(s)
        } else {
            None
        };

        let ocr_es_id = if ocr_stream_flag.get() == 1 {
            Some(u16::decode_at(payload, &mut offset)?)
        } else {
            None
        };

        // 後続の SLConfigDescriptor などは使わないので読み飛ばす
        let dec_config_descr = DecoderConfigDescriptor::decode_at(payload, &mut offset)?;

        Ok((
            Self {
                es_id,
                stream_priority,
                depends_on_es_id,
                url_string,
                ocr_es_id,
                dec_config_descr,
            },
            consumed,
        ))
    }
}

/// [ISO_IEC_14496-1] DecoderConfigDescriptor class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderConfigDescriptor {
    pub object_type_indication: u8,
    pub stream_type: Uint<u8, 6, 2>,
    pub up_stream: Uint<u8, 1, 1>,
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,

    /// MP3 のようにデコーダー固有情報を持たないストリームもあるので省略可能
    pub dec_specific_info: Option<DecoderSpecificInfo>,
}

impl DecoderConfigDescriptor {
    const TAG: u8 = 4; // DecoderConfigDescrTag

    /// MPEG-4 AAC 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3: u8 = 0x40;

    /// MPEG-2 AAC (Main / LC / SSR) 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATIONS_AUDIO_ISO_IEC_13818_7: [u8; 3] = [0x66, 0x67, 0x68];

    /// MPEG-1 / MPEG-2 Audio (MP3) 用の [`DecoderConfigDescriptor::object_type_indication`] の値
    pub const OBJECT_TYPE_INDICATIONS_MP3: [u8; 2] = [0x69, 0x6B];

    /// AAC 系のオブジェクト種別かどうか
    pub fn is_aac(&self) -> bool {
        self.object_type_indication == Self::OBJECT_TYPE_INDICATION_AUDIO_ISO_IEC_14496_3
            || Self::OBJECT_TYPE_INDICATIONS_AUDIO_ISO_IEC_13818_7
                .contains(&self.object_type_indication)
    }

    /// MP3 系のオブジェクト種別かどうか
    pub fn is_mp3(&self) -> bool {
        Self::OBJECT_TYPE_INDICATIONS_MP3.contains(&self.object_type_indication)
    }
}

impl Decode for DecoderConfigDescriptor {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_tagged_payload(buf, Self::TAG)?;
        let mut offset = 0;

        let object_type_indication = u8::decode_at(payload, &mut offset)?;
        let b = u8::decode_at(payload, &mut offset)?;
        let stream_type = Uint::from_bits(b);
        let up_stream = Uint::from_bits(b);
        let size_bytes = <[u8; 3]>::decode_at(payload, &mut offset)?;
        let buffer_size_db = u32::from_be_bytes([0, size_bytes[0], size_bytes[1], size_bytes[2]]);
        let max_bitrate = u32::decode_at(payload, &mut offset)?;
        let avg_bitrate = u32::decode_at(payload, &mut offset)?;

        let mut dec_specific_info = None;
        while offset < payload.len() {
            if payload[offset] == DecoderSpecificInfo::TAG && dec_specific_info.is_none() {
                dec_specific_info = Some(DecoderSpecificInfo::decode_at(payload, &mut offset)?);
            } else {
                let (_, n) = decode_tagged_payload(&payload[offset..], payload[offset])?;
                offset += n;
            }
        }

        Ok((
            Self {
                object_type_indication,
                stream_type,
                up_stream,
                buffer_size_db,
                max_bitrate,
                avg_bitrate,
                dec_specific_info,
            },
            consumed,
        ))
    }
}

/// [ISO_IEC_14496-1] DecoderSpecificInfo class
///
/// AAC の場合には AudioSpecificConfig のバイト列がそのまま入る
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DecoderSpecificInfo {
    pub payload: Vec<u8>,
}

impl DecoderSpecificInfo {
    const TAG: u8 = 5; // DecSpecificInfoTag
}

impl Decode for DecoderSpecificInfo {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (payload, consumed) = decode_tagged_payload(buf, Self::TAG)?;
        Ok((
            Self {
                payload: payload.to_vec(),
            },
            consumed,
        ))
    }
}

/// タグとサイズを読み込んで、ペイロード部分と消費したバイト数を返す
///
/// サイズは 1 バイトあたり 7 ビットの可変長で最大 4 バイトまで
fn decode_tagged_payload(buf: &[u8], expected_tag: u8) -> Result<(&[u8], usize)> {
    let mut offset = 0;
    let tag = u8::decode_at(buf, &mut offset)?;
    if tag != expected_tag {
        return Err(Error::invalid_data(format!(
            "Unexpected descriptor tag: expected={expected_tag}, actual={tag}"
        )));
    }

    let mut size = 0usize;
    for i in 0.. {
        if i == 4 {
            return Err(Error::invalid_data("Too long descriptor size field"));
        }
        let b = u8::decode_at(buf, &mut offset)?;
        size = (size << 7) | Uint::<u8, 7>::from_bits(b).get() as usize;
        if Uint::<u8, 1, 7>::from_bits(b).get() == 0 {
            break;
        }
    }

    if offset + size > buf.len() {
        return Err(Error::truncated(format!(
            "Descriptor (tag={tag}) size exceeds the enclosing box: declared={size}, available={}",
            buf.len() - offset
        )));
    }
    Ok((&buf[offset..offset + size], offset + size))
}
