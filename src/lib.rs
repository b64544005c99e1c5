//! WAV / AIFF / FLAC / Ogg / MP4 の各コンテナから音声データを取り出すための Demuxer ライブラリ
//!
//! どのコンテナ形式でも同じ API（[`demux::Demuxer`]）で扱うことができる。
//! 入力の形式がわからない場合は [`factory::DemuxerFactory`] を使うと、
//! 先頭のシグネチャから適切な Demuxer が選ばれる。
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use shiguredo_demux::buffer_pool::BufferPool;
//! use shiguredo_demux::factory::DemuxerFactory;
//! use shiguredo_demux::io::MemoryIoHandler;
//!
//! let mut wav = Vec::new();
//! wav.extend_from_slice(b"RIFF");
//! wav.extend_from_slice(&(4u32 + 24 + 8 + 8).to_le_bytes());
//! wav.extend_from_slice(b"WAVEfmt ");
//! wav.extend_from_slice(&16u32.to_le_bytes());
//! wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
//! wav.extend_from_slice(&1u16.to_le_bytes()); // チャンネル数
//! wav.extend_from_slice(&8000u32.to_le_bytes());
//! wav.extend_from_slice(&16000u32.to_le_bytes());
//! wav.extend_from_slice(&2u16.to_le_bytes());
//! wav.extend_from_slice(&16u16.to_le_bytes());
//! wav.extend_from_slice(b"data");
//! wav.extend_from_slice(&8u32.to_le_bytes());
//! wav.extend_from_slice(&[0; 8]);
//!
//! let demuxer = DemuxerFactory::create_demuxer(
//!     Box::new(MemoryIoHandler::new(wav)),
//!     Arc::new(BufferPool::default()),
//! )?;
//! assert!(demuxer.parse_container());
//! assert_eq!(demuxer.streams()[0].sample_rate, 8000);
//!
//! let chunk = demuxer.read_chunk();
//! assert!(chunk.is_valid());
//! assert_eq!(chunk.data.len(), 8);
//! # Ok::<(), shiguredo_demux::error::DemuxerError>(())
//! ```
#![warn(missing_docs)]

pub mod aiff;
mod auxiliary;
mod basic_types;
pub mod boxes;
mod boxes_moov_tree;
mod boxes_sample_entry;
pub mod buffer_pool;
mod codec;
pub mod compliance;
pub mod demux;
pub mod descriptors;
pub mod error;
pub mod factory;
pub mod flac;
pub mod io;
pub mod ogg;
pub mod riff;
mod stream;

pub use basic_types::{
    BaseBox, BoxHeader, BoxSize, BoxType, Either, FullBoxFlags, FullBoxHeader, Uint,
};
pub use codec::{Decode, Encode, Error, ErrorKind, Le, Result};
pub use stream::{CodecType, MediaChunk, StreamInfo};

// [NOTE]
// Windows 環境では aux.rs というファイル名が予約語で、リポジトリに含まれていると git clone に失敗するため、
// ファイル名自体は auxiliary.rs にして lib.rs の中で aux モジュール以下に再エクスポートしている。
pub mod aux {
    //! コンテナの仕様とは直接は関係がない、実装上便利な補助的なコンポーネントを集めたモジュール

    pub use crate::auxiliary::{SampleTableAccessor, SampleTableAccessorError};
}
