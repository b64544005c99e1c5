//! ISO BMFF (MP4 / MOV / 3GP) のボックス群
//!
//! Demuxer が必要とするボックスのデコードのみを扱う
pub use crate::boxes_moov_tree::{
    Co64Box, HdlrBox, MdhdBox, MdiaBox, MinfBox, MoovBox, MvhdBox, StblBox, StcoBox, StscBox,
    StscEntry, StsdBox, StssBox, StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox,
};
pub use crate::boxes_sample_entry::{
    AlacBox, AudioSampleEntry, AudioSampleEntryFields, DflaBox, DopsBox, EsdsBox,
    FlacMetadataBlock, SampleEntry,
};

use crate::{BaseBox, BoxHeader, BoxSize, BoxType, Decode, Error, Result};

pub(crate) use crate::codec::with_box_type;

/// 四文字で表現されるブランド
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// [ISO/IEC 14496-12] `isom`
    pub const ISOM: Self = Self::new(*b"isom");

    /// [ISO/IEC 14496-14] `mp41`
    pub const MP41: Self = Self::new(*b"mp41");

    /// [ISO/IEC 14496-14] `mp42`
    pub const MP42: Self = Self::new(*b"mp42");

    /// iTunes の音声ファイル `M4A `
    pub const M4A: Self = Self::new(*b"M4A ");

    /// QuickTime `qt  `
    pub const QT: Self = Self::new(*b"qt  ");

    /// [3GPP TS 26.244] `3gp4`
    pub const THREE_GP4: Self = Self::new(*b"3gp4");

    /// 指定されたバイト列に対応するブランドを作成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// ブランドのバイト列を返す
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Debug for Brand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Ok(s) = core::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (bytes, size) = <[u8; 4]>::decode(buf)?;
        Ok((Self(bytes), size))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");

    /// メジャーブランドと互換ブランドを順に走査する
    pub fn brands(&self) -> impl '_ + Iterator<Item = Brand> {
        core::iter::once(self.major_brand).chain(self.compatible_brands.iter().copied())
    }

    /// ペイロード部分（ボックスヘッダーを除いた部分）からデコードする
    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(Error::invalid_data(format!(
                "Too short ftyp payload: {} bytes (8 bytes or more required)",
                payload.len()
            ))
            .with_box_type(Self::TYPE));
        }

        let mut offset = 0;
        let major_brand = Brand::decode_at(payload, &mut offset)?;
        let minor_version = u32::decode_at(payload, &mut offset)?;
        let mut compatible_brands = Vec::new();
        while offset + 4 <= payload.len() {
            compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;
            let this = Self::decode_payload(payload)?;
            Ok((this, header.external_size() + payload.len()))
        })
    }
}

impl BaseBox for FtypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }
}

/// 中身を解釈しないボックス
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnknownBox {
    pub box_type: BoxType,
    pub box_size: BoxSize,
    pub payload: Vec<u8>,
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: header.box_size,
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn is_unknown_box(&self) -> bool {
        true
    }
}

/// 必須の子ボックスが存在するかをチェックする
#[track_caller]
pub(crate) fn check_mandatory_box<T>(maybe_box: Option<T>, expected: &str, parent: &str) -> Result<T> {
    maybe_box.ok_or_else(|| {
        Error::invalid_data(format!(
            "Missing mandatory '{expected}' box in '{parent}' box"
        ))
    })
}
