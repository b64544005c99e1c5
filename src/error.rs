//! Demuxer の公開 API が報告するエラー
use thiserror::Error;

use crate::{ErrorKind, codec};

/// Demuxer が報告するエラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCategory {
    /// ボックス / チャンク / ページの構造が壊れている
    #[error("MalformedHeader")]
    MalformedHeader,

    /// 宣言されたサイズに対して実データが足りない
    #[error("TruncatedData")]
    TruncatedData,

    /// コーデック設定が検証を通らなかった
    #[error("UnsupportedCodecConfiguration")]
    UnsupportedCodecConfiguration,

    /// 入力ソースの読み込みやシークに失敗した
    #[error("IOFailure")]
    IoFailure,

    /// 既知の尺を超える位置へのシークが要求された
    #[error("SeekOutOfRange")]
    SeekOutOfRange,

    /// 操作がその時点の Demuxer の状態では実行できない
    #[error("InvalidState")]
    InvalidState,
}

impl From<ErrorKind> for ErrorCategory {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InsufficientBuffer => Self::TruncatedData,
            ErrorKind::Unsupported => Self::UnsupportedCodecConfiguration,
            ErrorKind::Io => Self::IoFailure,
            ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::Other => {
                Self::MalformedHeader
            }
        }
    }
}

/// Demuxer の公開 API の境界で保持されるエラー情報
///
/// `category` と `message` は [`Demuxer::has_error()`](crate::demux::Demuxer::has_error) が
/// `true` の間は常に空ではない
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct DemuxerError {
    /// エラーの分類
    pub category: ErrorCategory,

    /// 人間が読むためのメッセージ
    pub message: String,

    /// エラーが検出されたファイル内の位置（わかる場合のみ）
    pub file_offset: Option<u64>,
}

impl DemuxerError {
    /// 分類とメッセージを指定してエラーを生成する
    pub fn new<T: Into<String>>(category: ErrorCategory, message: T) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = category.to_string();
        }
        Self {
            category,
            message,
            file_offset: None,
        }
    }

    /// エラー発生位置を付与する
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.file_offset = Some(offset);
        self
    }
}

impl From<codec::Error> for DemuxerError {
    fn from(e: codec::Error) -> Self {
        let message = match e.box_type {
            Some(ty) => format!("[{ty}] {}", e.reason),
            None => e.reason.clone(),
        };
        Self::new(e.kind.into(), message)
    }
}

impl From<std::io::Error> for DemuxerError {
    fn from(e: std::io::Error) -> Self {
        Self::from(codec::Error::from(e))
    }
}
