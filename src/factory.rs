//! 入力の形式判定と、対応する Demuxer の生成
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use shiguredo_demux::buffer_pool::BufferPool;
//! use shiguredo_demux::factory::{ContainerKind, DemuxerFactory, MediaFactory};
//! use shiguredo_demux::io::MemoryIoHandler;
//!
//! let mut io = MemoryIoHandler::new(b"fLaC\0\0\0\0".to_vec());
//! assert_eq!(
//!     DemuxerFactory::probe_format(&mut io).unwrap(),
//!     Some(ContainerKind::Flac)
//! );
//!
//! let info = MediaFactory::detect_by_extension("https://example.com/song.OPUS?x=1#t=3");
//! assert_eq!(info.detected_format, "opus");
//! assert_eq!(info.mime_type, "audio/opus");
//! ```
use std::{collections::BTreeMap, io::SeekFrom, path::Path, sync::Arc};

use crate::{
    buffer_pool::BufferPool,
    demux::{ChunkDemuxer, Demuxer, DemuxerConfig, FlacDemuxer, IsoDemuxer, OggDemuxer},
    error::{DemuxerError, ErrorCategory},
    flac::id3v2_tag_size,
    io::{FileIoHandler, IoHandler},
    ogg::{OggCodec, OggPage},
};

/// 先頭から読み込む判定用のバイト数
const PROBE_SIZE: usize = 512;

/// 拡張子による判定の信頼度
pub const EXTENSION_CONFIDENCE: f32 = 0.7;

/// MIME タイプによる判定の信頼度
pub const MIME_TYPE_CONFIDENCE: f32 = 0.9;

/// マジックバイトによる判定の信頼度
pub const MAGIC_CONFIDENCE: f32 = 0.95;

/// ID3v2 タグの後ろのシグネチャや Ogg のコーデックまで確認できた場合の信頼度
pub const PROBED_CONFIDENCE: f32 = 0.98;

/// Ogg のコーデックが判別できなかった場合の信頼度
const OGG_UNKNOWN_CODEC_CONFIDENCE: f32 = 0.85;

/// Demuxer を生成できるコンテナ形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// RIFF / WAVE
    Riff,

    /// AIFF / AIFF-C
    Aiff,

    /// Ogg
    Ogg,

    /// ネイティブ FLAC
    Flac,

    /// ISO BMFF (MP4 / M4A / MOV / 3GP)
    Iso,
}

impl ContainerKind {
    /// 拡張子（先頭のドットなし、大文字小文字は区別しない）から形式を推定する
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" | "bwf" => Some(Self::Riff),
            "aif" | "aiff" | "aifc" => Some(Self::Aiff),
            "ogg" | "oga" | "opus" | "spx" => Some(Self::Ogg),
            "flac" | "fla" => Some(Self::Flac),
            "mp4" | "m4a" | "m4b" | "m4p" | "mov" | "3gp" | "3g2" => Some(Self::Iso),
            _ => None,
        }
    }

    /// [`MediaFormat::format_id`] から形式を求める
    pub fn from_format_id(format_id: &str) -> Option<Self> {
        match format_id {
            "wave" => Some(Self::Riff),
            "aiff" => Some(Self::Aiff),
            "ogg" | "opus" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            "mp4" => Some(Self::Iso),
            _ => None,
        }
    }

    /// 先頭のバイト列のシグネチャから形式を判定する
    ///
    /// ID3v2 タグはここでは考慮しない
    pub fn from_signature(header: &[u8]) -> Option<Self> {
        if header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WAVE" {
            Some(Self::Riff)
        } else if header.len() >= 12
            && &header[..4] == b"FORM"
            && matches!(&header[8..12], b"AIFF" | b"AIFC")
        {
            Some(Self::Aiff)
        } else if header.starts_with(&OggPage::CAPTURE_PATTERN) {
            Some(Self::Ogg)
        } else if header.starts_with(b"fLaC") {
            Some(Self::Flac)
        } else if header.len() >= 8
            && matches!(&header[4..8], b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free")
        {
            Some(Self::Iso)
        } else {
            None
        }
    }

    /// 対応する [`MediaFormat::format_id`]
    pub const fn format_id(self) -> &'static str {
        match self {
            Self::Riff => "wave",
            Self::Aiff => "aiff",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Iso => "mp4",
        }
    }
}

/// 入力ソースの形式を判定して、対応する [`Demuxer`] を生成するファクトリー
#[derive(Debug)]
pub struct DemuxerFactory;

impl DemuxerFactory {
    /// 入力ソースの先頭を読んでコンテナ形式を判定する
    ///
    /// 先頭の ID3v2 タグは読み飛ばす。
    /// 判定後の読み込み位置はソースの先頭に戻される。
    pub fn probe_format(io: &mut dyn IoHandler) -> Result<Option<ContainerKind>, DemuxerError> {
        let header = io.read_up_to_at(0, PROBE_SIZE)?;
        let mut kind = ContainerKind::from_signature(&header);
        if kind.is_none()
            && let Some(tag_size) = id3v2_tag_size(&header)
        {
            log::debug!("Skipping ID3v2 tag ({tag_size} bytes) before probing");
            let after_tag = io.read_up_to_at(tag_size, 64)?;
            kind = ContainerKind::from_signature(&after_tag)
                .filter(|k| matches!(k, ContainerKind::Flac | ContainerKind::Ogg));
        }
        io.seek(SeekFrom::Start(0))?;
        log::debug!("Probed container format: {kind:?}");
        Ok(kind)
    }

    /// 入力ソースの形式を判定して、既定の設定で Demuxer を生成する
    ///
    /// 生成した Demuxer の [`Demuxer::parse_container()`] はまだ呼ばれていない
    pub fn create_demuxer(
        io: Box<dyn IoHandler>,
        pool: Arc<BufferPool>,
    ) -> Result<Demuxer, DemuxerError> {
        Self::create_demuxer_with_config(io, pool, DemuxerConfig::default())
    }

    /// 入力ソースの形式を判定して、指定の設定で Demuxer を生成する
    pub fn create_demuxer_with_config(
        mut io: Box<dyn IoHandler>,
        pool: Arc<BufferPool>,
        config: DemuxerConfig,
    ) -> Result<Demuxer, DemuxerError> {
        let kind = Self::probe_format(io.as_mut())?.ok_or_else(|| {
            DemuxerError::new(
                ErrorCategory::MalformedHeader,
                "Unrecognized container signature",
            )
            .at_offset(0)
        })?;
        Ok(Self::create_for_kind(kind, io, pool, config))
    }

    /// ファイルを開いて Demuxer を生成する
    ///
    /// シグネチャで判定できない場合は拡張子から形式を推定する
    pub fn create_demuxer_for_path<P: AsRef<Path>>(
        path: P,
        pool: Arc<BufferPool>,
        config: DemuxerConfig,
    ) -> Result<Demuxer, DemuxerError> {
        let path = path.as_ref();
        let mut io = FileIoHandler::open(path)?;
        let kind = match Self::probe_format(&mut io)? {
            Some(kind) => kind,
            None => path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ContainerKind::from_extension)
                .ok_or_else(|| {
                    DemuxerError::new(
                        ErrorCategory::MalformedHeader,
                        format!("Cannot determine container format of {}", path.display()),
                    )
                })?,
        };
        Ok(Self::create_for_kind(kind, Box::new(io), pool, config))
    }

    /// 形式を指定して Demuxer を生成する
    pub fn create_for_kind(
        kind: ContainerKind,
        io: Box<dyn IoHandler>,
        pool: Arc<BufferPool>,
        config: DemuxerConfig,
    ) -> Demuxer {
        match kind {
            ContainerKind::Riff | ContainerKind::Aiff => {
                ChunkDemuxer::with_config(io, pool, config).into()
            }
            ContainerKind::Ogg => OggDemuxer::with_config(io, pool, config).into(),
            ContainerKind::Flac => FlacDemuxer::with_config(io, pool, config).into(),
            ContainerKind::Iso => IsoDemuxer::with_config(io, pool, config).into(),
        }
    }
}

/// 登録済みのメディア形式の情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFormat {
    /// 形式の識別子
    pub format_id: &'static str,

    /// 表示名
    pub display_name: &'static str,

    /// 拡張子（小文字、先頭のドットなし）
    pub extensions: &'static [&'static str],

    /// MIME タイプ（先頭が代表値）
    pub mime_types: &'static [&'static str],

    /// 説明
    pub description: &'static str,
}

impl MediaFormat {
    /// この形式に対応する Demuxer があるかどうか
    pub fn is_demuxable(&self) -> bool {
        ContainerKind::from_format_id(self.format_id).is_some()
    }
}

const FORMATS: &[MediaFormat] = &[
    MediaFormat {
        format_id: "mpeg_audio",
        display_name: "MPEG Audio",
        extensions: &["mp3", "mp2", "mpa"],
        mime_types: &["audio/mpeg", "audio/mp3"],
        description: "MPEG-1/2 Layer I/II/III elementary stream",
    },
    MediaFormat {
        format_id: "flac",
        display_name: "FLAC",
        extensions: &["flac", "fla"],
        mime_types: &["audio/flac", "audio/x-flac"],
        description: "Free Lossless Audio Codec native stream",
    },
    MediaFormat {
        format_id: "opus",
        display_name: "Opus",
        extensions: &["opus"],
        mime_types: &["audio/opus"],
        description: "Opus audio in an Ogg container",
    },
    MediaFormat {
        format_id: "ogg",
        display_name: "Ogg",
        extensions: &["ogg", "oga", "spx"],
        mime_types: &["application/ogg", "audio/ogg", "audio/vorbis"],
        description: "Ogg container (Vorbis, Opus, FLAC, Speex)",
    },
    MediaFormat {
        format_id: "wave",
        display_name: "WAVE",
        extensions: &["wav", "wave", "bwf"],
        mime_types: &["audio/wav", "audio/wave", "audio/x-wav"],
        description: "RIFF WAVE audio",
    },
    MediaFormat {
        format_id: "aiff",
        display_name: "AIFF",
        extensions: &["aif", "aiff", "aifc"],
        mime_types: &["audio/aiff", "audio/x-aiff"],
        description: "Audio Interchange File Format",
    },
    MediaFormat {
        format_id: "mp4",
        display_name: "MPEG-4",
        extensions: &["mp4", "m4a", "m4b", "m4p", "mov", "3gp", "3g2"],
        mime_types: &["audio/mp4", "audio/m4a", "video/mp4"],
        description: "ISO base media file format",
    },
];

/// 形式判定の結果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContentInfo {
    /// 判定された [`MediaFormat::format_id`]（判定できなかった場合は空）
    pub detected_format: String,

    /// MIME タイプ
    pub mime_type: String,

    /// 拡張子（小文字、先頭のドットなし）
    pub file_extension: String,

    /// 判定の信頼度（0.0 から 1.0）
    pub confidence: f32,

    /// 判定の過程で得られた付加情報
    pub metadata: BTreeMap<String, String>,
}

impl ContentInfo {
    /// 形式が判定できたかどうか
    pub fn is_detected(&self) -> bool {
        !self.detected_format.is_empty()
    }

    fn from_format(format: &MediaFormat, confidence: f32) -> Self {
        Self {
            detected_format: format.format_id.to_owned(),
            mime_type: format.mime_types.first().copied().unwrap_or_default().to_owned(),
            confidence,
            ..Default::default()
        }
    }
}

/// 拡張子・MIME タイプ・中身から形式を判定するファクトリー
#[derive(Debug)]
pub struct MediaFactory;

impl MediaFactory {
    /// 登録済みの全ての形式
    pub fn supported_formats() -> &'static [MediaFormat] {
        FORMATS
    }

    /// 識別子から形式の情報を取得する
    pub fn format_info(format_id: &str) -> Option<&'static MediaFormat> {
        FORMATS.iter().find(|f| f.format_id == format_id)
    }

    /// 拡張子に対応する形式があるかどうか
    pub fn supports_extension(ext: &str) -> bool {
        Self::format_for_extension(ext).is_some()
    }

    /// MIME タイプに対応する形式があるかどうか
    pub fn supports_mime_type(mime_type: &str) -> bool {
        Self::format_for_mime_type(mime_type).is_some()
    }

    /// 拡張子から代表の MIME タイプを求める
    pub fn extension_to_mime_type(ext: &str) -> Option<&'static str> {
        Self::format_for_extension(ext).and_then(|f| f.mime_types.first().copied())
    }

    /// MIME タイプから代表の拡張子を求める
    pub fn mime_type_to_extension(mime_type: &str) -> Option<&'static str> {
        Self::format_for_mime_type(mime_type).and_then(|f| f.extensions.first().copied())
    }

    /// URI またはパスから拡張子を取り出す
    ///
    /// クエリ文字列とフラグメントは取り除かれ、結果は小文字になる
    pub fn extract_extension(uri: &str) -> String {
        let end = uri.find(['?', '#']).unwrap_or(uri.len());
        let path = &uri[..end];
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        match name.rfind('.') {
            Some(i) if i + 1 < name.len() => name[i + 1..].to_ascii_lowercase(),
            _ => String::new(),
        }
    }

    /// 拡張子から形式を判定する
    pub fn detect_by_extension(uri: &str) -> ContentInfo {
        let ext = Self::extract_extension(uri);
        let mut info = match Self::format_for_extension(&ext) {
            Some(format) => ContentInfo::from_format(format, EXTENSION_CONFIDENCE),
            None => {
                log::trace!("No format registered for extension {ext:?}");
                ContentInfo::default()
            }
        };
        info.file_extension = ext;
        info
    }

    /// MIME タイプから形式を判定する
    ///
    /// `audio/ogg; codecs=opus` のようなパラメータは無視する
    pub fn detect_by_mime_type(mime_type: &str) -> ContentInfo {
        let Some(format) = Self::format_for_mime_type(mime_type) else {
            return ContentInfo::default();
        };
        let mut info = ContentInfo::from_format(format, MIME_TYPE_CONFIDENCE);
        info.mime_type = essence(mime_type);
        info.file_extension = format.extensions.first().copied().unwrap_or_default().to_owned();
        info
    }

    /// 入力ソースの中身から形式を判定する
    ///
    /// 判定後の読み込み位置は呼び出し前の位置に戻される
    pub fn detect_by_magic(io: &mut dyn IoHandler) -> Result<ContentInfo, DemuxerError> {
        let original = io.tell();
        let header = io.read_up_to_at(0, PROBE_SIZE)?;
        let info = Self::detect_in_header(io, &header);
        io.seek(SeekFrom::Start(original))?;
        info
    }

    /// 入力ソースの中身を解析する
    pub fn analyze_io(io: &mut dyn IoHandler) -> ContentInfo {
        match Self::detect_by_magic(io) {
            Ok(info) => info,
            Err(e) => {
                log::debug!("Content analysis failed: {e}");
                ContentInfo::default()
            }
        }
    }

    /// パスの拡張子とファイルの中身から形式を判定する
    ///
    /// より信頼度の高い判定結果を採用し、もう一方の付加情報で足りない項目を補う。
    /// ファイルが開けない場合は拡張子による判定結果だけを返す。
    pub fn analyze_content(path: &str) -> ContentInfo {
        let by_extension = Self::detect_by_extension(path);
        let by_content = match FileIoHandler::open(path) {
            Ok(mut io) => Self::analyze_io(&mut io),
            Err(e) => {
                log::debug!("Cannot open {path} for content analysis: {e}");
                ContentInfo::default()
            }
        };
        merge(by_extension, by_content)
    }

    /// MIME タイプの指定と入力ソースの中身から形式を判定する
    pub fn analyze_with_mime_type(io: &mut dyn IoHandler, mime_type: &str) -> ContentInfo {
        merge(Self::detect_by_mime_type(mime_type), Self::analyze_io(io))
    }

    /// 判定結果に対応する Demuxer を生成する
    pub fn create_demuxer(
        info: &ContentInfo,
        io: Box<dyn IoHandler>,
        pool: Arc<BufferPool>,
        config: DemuxerConfig,
    ) -> Result<Demuxer, DemuxerError> {
        let kind = ContainerKind::from_format_id(&info.detected_format).ok_or_else(|| {
            DemuxerError::new(
                ErrorCategory::UnsupportedCodecConfiguration,
                format!("No demuxer for format {:?}", info.detected_format),
            )
        })?;
        Ok(DemuxerFactory::create_for_kind(kind, io, pool, config))
    }

    fn format_for_extension(ext: &str) -> Option<&'static MediaFormat> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        FORMATS.iter().find(|f| f.extensions.contains(&ext.as_str()))
    }

    fn format_for_mime_type(mime_type: &str) -> Option<&'static MediaFormat> {
        let mime_type = essence(mime_type);
        FORMATS
            .iter()
            .find(|f| f.mime_types.contains(&mime_type.as_str()))
    }

    fn detect_in_header(
        io: &mut dyn IoHandler,
        header: &[u8],
    ) -> Result<ContentInfo, DemuxerError> {
        if header.len() < 4 {
            return Ok(ContentInfo::default());
        }

        if let Some(tag_size) = id3v2_tag_size(header) {
            let after_tag = io.read_up_to_at(tag_size, 64)?;
            let format_id = match after_tag.as_slice() {
                [b'f', b'L', b'a', b'C', ..] => Some(("flac", "fLaC")),
                [b'O', b'g', b'g', b'S', ..] => Some(("ogg", "OggS")),
                [0xFF, b, ..] if b & 0xE0 == 0xE0 => Some(("mpeg_audio", "ID3+sync")),
                _ => None,
            };
            if let Some((format_id, signature)) = format_id
                && let Some(format) = Self::format_info(format_id)
            {
                log::debug!("Found {format_id} after ID3v2 tag ({tag_size} bytes)");
                let mut info = ContentInfo::from_format(format, PROBED_CONFIDENCE);
                info.metadata.insert("has_id3".to_owned(), "true".to_owned());
                info.metadata
                    .insert("magic_signature".to_owned(), signature.to_owned());
                return Ok(info);
            }
            log::debug!("ID3v2 tag found, but the format after it is unclear");
        }

        if header.starts_with(&OggPage::CAPTURE_PATTERN) {
            return Ok(Self::probe_ogg(io));
        }

        let (format_id, signature) = if let Some(kind) = ContainerKind::from_signature(header) {
            let signature = match kind {
                ContainerKind::Iso => String::from_utf8_lossy(&header[4..8]).into_owned(),
                _ => String::from_utf8_lossy(&header[..4]).into_owned(),
            };
            (kind.format_id(), signature)
        } else if header[0] == 0xFF && matches!(header[1], 0xFB | 0xFA | 0xF3 | 0xF2) {
            ("mpeg_audio", "sync".to_owned())
        } else {
            return Ok(ContentInfo::default());
        };
        let Some(format) = Self::format_info(format_id) else {
            return Ok(ContentInfo::default());
        };
        let mut info = ContentInfo::from_format(format, MAGIC_CONFIDENCE);
        info.metadata.insert("magic_signature".to_owned(), signature);
        Ok(info)
    }

    fn probe_ogg(io: &mut dyn IoHandler) -> ContentInfo {
        let codec = match crate::ogg::page::read_page_at(io, 0) {
            Ok(Some(page)) => page
                .packet_spans()
                .first()
                .map(|(range, _)| OggCodec::identify(&page.body[range.clone()]))
                .unwrap_or_default(),
            Ok(None) => OggCodec::Unknown,
            Err(e) => {
                log::debug!("Cannot read the first Ogg page: {}", e.reason);
                OggCodec::Unknown
            }
        };
        let format_id = if codec == OggCodec::Opus { "opus" } else { "ogg" };
        let Some(format) = Self::format_info(format_id) else {
            return ContentInfo::default();
        };
        let confidence = if codec == OggCodec::Unknown {
            OGG_UNKNOWN_CODEC_CONFIDENCE
        } else {
            PROBED_CONFIDENCE
        };
        let mut info = ContentInfo::from_format(format, confidence);
        info.metadata
            .insert("magic_signature".to_owned(), "OggS".to_owned());
        if codec != OggCodec::Unknown {
            log::debug!("Ogg codec detected: {}", codec.name());
            info.metadata
                .insert("codec".to_owned(), codec.name().to_owned());
        }
        info
    }
}

fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn merge(hint: ContentInfo, content: ContentInfo) -> ContentInfo {
    if content.confidence > hint.confidence {
        let mut best = content;
        if !hint.file_extension.is_empty() {
            best.file_extension = hint.file_extension;
        }
        best
    } else {
        let mut best = hint;
        if best.is_detected() {
            if best.mime_type.is_empty() {
                best.mime_type = content.mime_type;
            }
            for (key, value) in content.metadata {
                best.metadata.entry(key).or_insert(value);
            }
        }
        best
    }
}
