//! コンテナ形式ごとの Demuxer
//!
//! 全ての形式は [`DemuxerCore`] の上に実装されていて、同じ公開 API を持つ。
//! 形式を問わずに扱いたい場合は [`Demuxer`] を使う。
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use shiguredo_demux::buffer_pool::BufferPool;
//! use shiguredo_demux::demux::ChunkDemuxer;
//! use shiguredo_demux::io::MemoryIoHandler;
//!
//! let demuxer = ChunkDemuxer::new(
//!     Box::new(MemoryIoHandler::new(vec![0u8; 4])),
//!     Arc::new(BufferPool::default()),
//! );
//! assert!(!demuxer.parse_container());
//! assert!(demuxer.has_error());
//! assert!(demuxer.streams().is_empty());
//! ```
use std::sync::Arc;

use crate::{MediaChunk, StreamInfo, buffer_pool::BufferPool, error::DemuxerError};

mod chunk;
mod core;
mod flac;
pub(crate) mod iso;

pub use self::chunk::ChunkFormat;
pub use self::core::{ContainerFormat, DemuxerCore};
pub use self::flac::FlacFormat;
pub use self::iso::IsoFormat;
pub use crate::ogg::OggFormat;

/// RIFF / WAVE と AIFF / AIFF-C 用の Demuxer
pub type ChunkDemuxer = DemuxerCore<ChunkFormat>;

/// ネイティブ FLAC 用の Demuxer
pub type FlacDemuxer = DemuxerCore<FlacFormat>;

/// Ogg 用の Demuxer
pub type OggDemuxer = DemuxerCore<OggFormat>;

/// ISO BMFF (MP4 / M4A / MOV / 3GP) 用の Demuxer
pub type IsoDemuxer = DemuxerCore<IsoFormat>;

/// Demuxer の動作設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxerConfig {
    /// PCM のような固定長サンプルのデータを読み込む際のチャンクサイズの目安（バイト）
    pub pcm_chunk_bytes: usize,

    /// コーデック設定データを検証するかどうか
    pub validate_codec_config: bool,

    /// Ogg のヘッダーを探す際に読み込むページ数の上限
    pub max_header_pages: usize,

    /// FLAC の 1 フレームとして扱うバイト数の上限
    pub max_flac_frame_bytes: usize,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            pcm_chunk_bytes: 4096,
            validate_codec_config: true,
            max_header_pages: 1024,
            max_flac_frame_bytes: 1024 * 1024,
        }
    }
}

/// 形式を問わずに扱える Demuxer
#[derive(Debug)]
#[allow(missing_docs)]
pub enum Demuxer {
    Chunk(ChunkDemuxer),
    Flac(FlacDemuxer),
    Ogg(OggDemuxer),
    Iso(IsoDemuxer),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $e:expr) => {
        match $self {
            Demuxer::Chunk($d) => $e,
            Demuxer::Flac($d) => $e,
            Demuxer::Ogg($d) => $e,
            Demuxer::Iso($d) => $e,
        }
    };
}

impl Demuxer {
    /// コンテナ形式の名前
    pub fn format_name(&self) -> &'static str {
        dispatch!(self, d => d.format_name())
    }

    /// [`DemuxerCore::parse_container()`] を参照
    pub fn parse_container(&self) -> bool {
        dispatch!(self, d => d.parse_container())
    }

    /// [`DemuxerCore::streams()`] を参照
    pub fn streams(&self) -> Vec<StreamInfo> {
        dispatch!(self, d => d.streams())
    }

    /// [`DemuxerCore::stream_info()`] を参照
    pub fn stream_info(&self, stream_id: u32) -> StreamInfo {
        dispatch!(self, d => d.stream_info(stream_id))
    }

    /// [`DemuxerCore::read_chunk()`] を参照
    pub fn read_chunk(&self) -> MediaChunk {
        dispatch!(self, d => d.read_chunk())
    }

    /// [`DemuxerCore::read_chunk_from()`] を参照
    pub fn read_chunk_from(&self, stream_id: u32) -> MediaChunk {
        dispatch!(self, d => d.read_chunk_from(stream_id))
    }

    /// [`DemuxerCore::seek_to()`] を参照
    pub fn seek_to(&self, timestamp_ms: u64) -> bool {
        dispatch!(self, d => d.seek_to(timestamp_ms))
    }

    /// [`DemuxerCore::duration()`] を参照
    pub fn duration(&self) -> u64 {
        dispatch!(self, d => d.duration())
    }

    /// [`DemuxerCore::position()`] を参照
    pub fn position(&self) -> u64 {
        dispatch!(self, d => d.position())
    }

    /// [`DemuxerCore::is_eof()`] を参照
    pub fn is_eof(&self) -> bool {
        dispatch!(self, d => d.is_eof())
    }

    /// [`DemuxerCore::is_parsed()`] を参照
    pub fn is_parsed(&self) -> bool {
        dispatch!(self, d => d.is_parsed())
    }

    /// [`DemuxerCore::has_error()`] を参照
    pub fn has_error(&self) -> bool {
        dispatch!(self, d => d.has_error())
    }

    /// [`DemuxerCore::last_error()`] を参照
    pub fn last_error(&self) -> Option<DemuxerError> {
        dispatch!(self, d => d.last_error())
    }

    /// [`DemuxerCore::clear_error()`] を参照
    pub fn clear_error(&self) {
        dispatch!(self, d => d.clear_error())
    }

    /// [`DemuxerCore::buffer_pool()`] を参照
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        dispatch!(self, d => d.buffer_pool())
    }

    /// [`DemuxerCore::close()`] を参照
    pub fn close(&self) -> bool {
        dispatch!(self, d => d.close())
    }

    /// Ogg の場合のみ、その Demuxer を返す
    pub fn as_ogg(&self) -> Option<&OggDemuxer> {
        match self {
            Self::Ogg(d) => Some(d),
            _ => None,
        }
    }
}

impl From<ChunkDemuxer> for Demuxer {
    fn from(d: ChunkDemuxer) -> Self {
        Self::Chunk(d)
    }
}

impl From<FlacDemuxer> for Demuxer {
    fn from(d: FlacDemuxer) -> Self {
        Self::Flac(d)
    }
}

impl From<OggDemuxer> for Demuxer {
    fn from(d: OggDemuxer) -> Self {
        Self::Ogg(d)
    }
}

impl From<IsoDemuxer> for Demuxer {
    fn from(d: IsoDemuxer) -> Self {
        Self::Iso(d)
    }
}
