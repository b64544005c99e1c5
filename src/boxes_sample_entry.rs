//! サンプルエントリー系のボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Error, FullBoxHeader, Result, Uint,
    boxes::{UnknownBox, with_box_type},
    descriptors::EsDescriptor,
};

/// [`StsdBox`](crate::boxes::StsdBox) に含まれるエントリー
///
/// 音声以外のエントリーは中身を解釈せずに [`SampleEntry::Unknown`] として保持する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleEntry {
    Audio(AudioSampleEntry),
    Unknown(UnknownBox),
}

impl SampleEntry {
    /// 音声のサンプルエントリーとして扱う種別
    pub const AUDIO_TYPES: [BoxType; 15] = [
        BoxType::Normal(*b"mp4a"),
        BoxType::Normal(*b"alac"),
        BoxType::Normal(*b"Opus"),
        BoxType::Normal(*b"fLaC"),
        BoxType::Normal(*b"ulaw"),
        BoxType::Normal(*b"alaw"),
        BoxType::Normal(*b"lpcm"),
        BoxType::Normal(*b"twos"),
        BoxType::Normal(*b"sowt"),
        BoxType::Normal(*b"raw "),
        BoxType::Normal(*b"in24"),
        BoxType::Normal(*b"in32"),
        BoxType::Normal(*b"fl32"),
        BoxType::Normal(*b"fl64"),
        BoxType::Normal(*b".mp3"),
    ];

    /// 音声エントリーの場合にはその中身を返す
    pub fn as_audio(&self) -> Option<&AudioSampleEntry> {
        match self {
            Self::Audio(b) => Some(b),
            Self::Unknown(_) => None,
        }
    }
}

impl Decode for SampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        if Self::AUDIO_TYPES.contains(&header.box_type) {
            AudioSampleEntry::decode(buf).map(|(b, n)| (Self::Audio(b), n))
        } else {
            UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n))
        }
    }
}

impl BaseBox for SampleEntry {
    fn box_type(&self) -> BoxType {
        match self {
            Self::Audio(b) => b.box_type(),
            Self::Unknown(b) => b.box_type(),
        }
    }

    fn is_unknown_box(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// 音声系のサンプルエントリー
///
/// `mp4a` / `alac` / `Opus` / `fLaC` / `ulaw` / `alaw` / `lpcm` などを一つの型で扱い、
/// コーデック固有の設定ボックスは存在するものだけが埋まる
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntry {
    pub box_type: BoxType,
    pub audio: AudioSampleEntryFields,
    pub esds_box: Option<EsdsBox>,
    pub alac_box: Option<AlacBox>,
    pub dops_box: Option<DopsBox>,
    pub dfla_box: Option<DflaBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl AudioSampleEntry {
    const WAVE_BOX_TYPE: BoxType = BoxType::Normal(*b"wave");

    fn decode_children(&mut self, payload: &[u8], mut offset: usize) -> Result<()> {
        while offset < payload.len() {
            // QuickTime では末尾に 4 バイトの終端マーカー（0）が置かれることがある
            if payload.len() - offset < BoxHeader::MIN_SIZE {
                break;
            }
            let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
            match child_header.box_type {
                EsdsBox::TYPE if self.esds_box.is_none() => {
                    self.esds_box = Some(EsdsBox::decode_at(payload, &mut offset)?);
                }
                AlacBox::TYPE if self.alac_box.is_none() => {
                    self.alac_box = Some(AlacBox::decode_at(payload, &mut offset)?);
                }
                DopsBox::TYPE if self.dops_box.is_none() => {
                    self.dops_box = Some(DopsBox::decode_at(payload, &mut offset)?);
                }
                DflaBox::TYPE if self.dfla_box.is_none() => {
                    self.dfla_box = Some(DflaBox::decode_at(payload, &mut offset)?);
                }
                Self::WAVE_BOX_TYPE => {
                    // QuickTime の `wave` ボックスの中に esds や alac が入っている場合がある
                    let (header, wave_payload) =
                        BoxHeader::decode_header_and_payload(&payload[offset..])?;
                    offset += header.external_size() + wave_payload.len();
                    with_box_type(Self::WAVE_BOX_TYPE, || self.decode_children(wave_payload, 0))?;
                }
                _ => {
                    self.unknown_boxes
                        .push(UnknownBox::decode_at(payload, &mut offset)?);
                }
            }
        }
        Ok(())
    }
}

impl Decode for AudioSampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        with_box_type(header.box_type, || {
            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;

            let mut this = Self {
                box_type: header.box_type,
                audio,
                esds_box: None,
                alac_box: None,
                dops_box: None,
                dfla_box: None,
                unknown_boxes: Vec::new(),
            };
            this.decode_children(payload, offset)?;

            Ok((this, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for AudioSampleEntry {
    fn box_type(&self) -> BoxType {
        self.box_type
    }
}

/// 音声系の [`SampleEntry`] に共通のフィールドをまとめた構造体
///
/// QuickTime のサウンドサンプル記述のバージョン 1 / 2 の拡張フィールドにも対応している
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntryFields {
    pub data_reference_index: u16,
    pub version: u16,
    pub channelcount: u32,
    pub samplesize: u32,

    /// サンプリングレートの整数部分
    ///
    /// バージョン 0 / 1 では 16.16 固定小数点数の整数部分なので 65535 を超える値は表現できない
    pub samplerate: u32,
}

impl Decode for AudioSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let _ = <[u8; 6]>::decode_at(buf, &mut offset)?;
        let data_reference_index = u16::decode_at(buf, &mut offset)?;
        let version = u16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2 + 4]>::decode_at(buf, &mut offset)?;
        let mut channelcount = u16::decode_at(buf, &mut offset)? as u32;
        let mut samplesize = u16::decode_at(buf, &mut offset)? as u32;
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        let mut samplerate = (u32::decode_at(buf, &mut offset)? >> 16) & 0xFFFF;

        match version {
            1 => {
                // samplesPerPacket, bytesPerPacket, bytesPerFrame, bytesPerSample
                let _ = <[u8; 4 * 4]>::decode_at(buf, &mut offset)?;
            }
            2 => {
                let _size_of_struct_only = u32::decode_at(buf, &mut offset)?;
                let rate = f64::from_bits(u64::decode_at(buf, &mut offset)?);
                channelcount = u32::decode_at(buf, &mut offset)?;
                let _always_7f000000 = u32::decode_at(buf, &mut offset)?;
                samplesize = u32::decode_at(buf, &mut offset)?;
                let _ = <[u8; 4 * 3]>::decode_at(buf, &mut offset)?;
                if !(rate.is_finite() && rate >= 0.0 && rate <= u32::MAX as f64) {
                    return Err(Error::invalid_data(format!(
                        "Invalid sample rate in version 2 sound description: {rate}"
                    )));
                }
                samplerate = rate.round() as u32;
            }
            _ => {}
        }

        Ok((
            Self {
                data_reference_index,
                version,
                channelcount,
                samplesize,
                samplerate,
            },
            offset,
        ))
    }
}

/// [ISO/IEC 14496-14] ESDBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct EsdsBox {
    pub es: EsDescriptor,
}

impl EsdsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"esds");
}

impl Decode for EsdsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let es = EsDescriptor::decode_at(payload, &mut offset)?;

            Ok((Self { es }, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for EsdsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// Apple Lossless の ALACSpecificConfig を保持するボックス (親: `alac` サンプルエントリー)
///
/// <https://github.com/macosforge/alac/blob/master/ALACMagicCookieDescription.txt>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AlacBox {
    pub frame_length: u32,
    pub compatible_version: u8,
    pub bit_depth: u8,
    pub num_channels: u8,
    pub max_frame_bytes: u32,
    pub avg_bit_rate: u32,
    pub sample_rate: u32,

    /// ボックスヘッダーを含むボックス全体のバイト列（いわゆる magic cookie）
    pub magic_cookie: Vec<u8>,
}

impl AlacBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"alac");

    /// ALACSpecificConfig のバイト数
    pub const CONFIG_SIZE: usize = 24;
}

impl Decode for AlacBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            if payload.len() - offset < Self::CONFIG_SIZE {
                return Err(Error::truncated(format!(
                    "Too short ALACSpecificConfig: {} bytes",
                    payload.len() - offset
                )));
            }
            let frame_length = u32::decode_at(payload, &mut offset)?;
            let compatible_version = u8::decode_at(payload, &mut offset)?;
            let bit_depth = u8::decode_at(payload, &mut offset)?;
            let _rice_params = <[u8; 3]>::decode_at(payload, &mut offset)?;
            let num_channels = u8::decode_at(payload, &mut offset)?;
            let _max_run = u16::decode_at(payload, &mut offset)?;
            let max_frame_bytes = u32::decode_at(payload, &mut offset)?;
            let avg_bit_rate = u32::decode_at(payload, &mut offset)?;
            let sample_rate = u32::decode_at(payload, &mut offset)?;

            let size = header.external_size() + payload.len();
            Ok((
                Self {
                    frame_length,
                    compatible_version,
                    bit_depth,
                    num_channels,
                    max_frame_bytes,
                    avg_bit_rate,
                    sample_rate,
                    magic_cookie: buf[..size].to_vec(),
                },
                size,
            ))
        })
    }
}

impl BaseBox for AlacBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [<https://gitlab.xiph.org/xiph/opus/-/blob/main/doc/opus_in_isobmff.html>] OpusSpecificBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct DopsBox {
    pub output_channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping_family: u8,

    /// ChannelMappingFamily が 0 以外の場合のチャンネルマッピング表
    pub channel_mapping_table: Vec<u8>,
}

impl DopsBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dOps");

    const VERSION: u8 = 0;

    /// Ogg Opus の識別ヘッダー（OpusHead）形式に変換する
    ///
    /// デコーダーはこの形式の設定データを期待するため、`codec_data` にはこちらを渡す
    pub fn to_opus_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(19 + self.channel_mapping_table.len());
        head.extend_from_slice(b"OpusHead");
        head.push(1);
        head.push(self.output_channel_count);
        head.extend_from_slice(&self.pre_skip.to_le_bytes());
        head.extend_from_slice(&self.input_sample_rate.to_le_bytes());
        head.extend_from_slice(&self.output_gain.to_le_bytes());
        head.push(self.channel_mapping_family);
        head.extend_from_slice(&self.channel_mapping_table);
        head
    }
}

impl Decode for DopsBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let version = u8::decode_at(payload, &mut offset)?;
            if version != Self::VERSION {
                return Err(Error::unsupported(format!(
                    "Unsupported dOps version: {version}"
                )));
            }

            let output_channel_count = u8::decode_at(payload, &mut offset)?;
            let pre_skip = u16::decode_at(payload, &mut offset)?;
            let input_sample_rate = u32::decode_at(payload, &mut offset)?;
            let output_gain = i16::decode_at(payload, &mut offset)?;
            let channel_mapping_family = u8::decode_at(payload, &mut offset)?;
            let channel_mapping_table = if channel_mapping_family != 0 {
                // StreamCount, CoupledCount, ChannelMapping[OutputChannelCount]
                let len = 2 + output_channel_count as usize;
                Error::check_buffer_size(offset + len, payload)?;
                payload[offset..offset + len].to_vec()
            } else {
                Vec::new()
            };

            Ok((
                Self {
                    output_channel_count,
                    pre_skip,
                    input_sample_rate,
                    output_gain,
                    channel_mapping_family,
                    channel_mapping_table,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DopsBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// [Encapsulation of FLAC in ISO Base Media File Format] FLACSpecificBox class
///
/// <https://github.com/xiph/flac/blob/master/doc/isoflac.txt>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DflaBox {
    /// FLAC メタデータブロックのリスト
    /// 最初のブロックは必ず STREAMINFO (block_type=0) でなければならない
    pub metadata_blocks: Vec<FlacMetadataBlock>,
}

impl DflaBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"dfLa");

    const VERSION: u8 = 0;

    /// STREAMINFO ブロックのデータ部分を返す
    pub fn streaminfo(&self) -> &[u8] {
        // デコード時に先頭が STREAMINFO であることを確認済み
        self.metadata_blocks
            .first()
            .map(|b| b.block_data.as_slice())
            .unwrap_or_default()
    }
}

impl Decode for DflaBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            if full_header.version != Self::VERSION {
                return Err(Error::invalid_data(format!(
                    "Unsupported dfLa version: {}",
                    full_header.version
                )));
            }

            let mut metadata_blocks = Vec::new();
            while offset < payload.len() {
                let block = FlacMetadataBlock::decode_at(payload, &mut offset)?;
                let is_last = block.last_metadata_block_flag.get() == 1;
                metadata_blocks.push(block);
                if is_last {
                    break;
                }
            }

            if metadata_blocks.is_empty() {
                return Err(Error::invalid_data(
                    "dfLa box must contain at least one metadata block (STREAMINFO)",
                ));
            }

            if metadata_blocks[0].block_type != FlacMetadataBlock::BLOCK_TYPE_STREAMINFO {
                return Err(Error::invalid_data(
                    "First metadata block in dfLa must be STREAMINFO (block_type=0)",
                ));
            }

            Ok((
                Self { metadata_blocks },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for DflaBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// FLAC メタデータブロック
///
/// FLAC 仕様の METADATA_BLOCK 構造を表現する
///
/// <https://xiph.org/flac/format.html>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlacMetadataBlock {
    /// 最後のメタデータブロックかどうかを示すフラグ
    pub last_metadata_block_flag: Uint<u8, 1, 7>,

    /// ブロックタイプ
    pub block_type: Uint<u8, 7>,

    /// ブロックデータ
    pub block_data: Vec<u8>,
}

impl FlacMetadataBlock {
    /// ブロックタイプ: STREAMINFO
    pub const BLOCK_TYPE_STREAMINFO: Uint<u8, 7> = Uint::new(0);
}

impl Decode for FlacMetadataBlock {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;

        let first_byte = u8::decode_at(buf, &mut offset)?;
        let last_metadata_block_flag = Uint::from_bits(first_byte);
        let block_type = Uint::from_bits(first_byte);

        let length_bytes = <[u8; 3]>::decode_at(buf, &mut offset)?;
        let length = ((length_bytes[0] as usize) << 16)
            | ((length_bytes[1] as usize) << 8)
            | (length_bytes[2] as usize);

        Error::check_buffer_size(offset + length, buf)?;
        let block_data = buf[offset..offset + length].to_vec();
        offset += length;

        Ok((
            Self {
                last_metadata_block_flag,
                block_type,
                block_data,
            },
            offset,
        ))
    }
}
