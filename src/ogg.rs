//! Ogg コンテナ
//!
//! ページ構造とページ探索は [`page`] に、グラニュール位置の演算は [`granule`] に、
//! 各コーデックのヘッダー解釈は [`codecs`] にある。
//! Demuxer 本体は [`crate::demux::OggDemuxer`] として公開されている。
pub mod codecs;
mod demuxer;
pub mod granule;
pub mod page;

pub use self::codecs::{IdentificationHeader, OggCodec};
pub use self::demuxer::{OggFormat, OggStream};
pub use self::page::OggPage;
