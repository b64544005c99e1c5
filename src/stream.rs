//! Demuxer が返すストリーム情報とチャンクのデータモデル

/// ストリームの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// 音声
    Audio,

    /// 映像
    Video,

    /// 字幕
    Subtitle,
}

impl CodecType {
    /// 文字列表現を返す
    pub const fn as_str(self) -> &'static str {
        match self {
            CodecType::Audio => "audio",
            CodecType::Video => "video",
            CodecType::Subtitle => "subtitle",
        }
    }
}

impl core::fmt::Display for CodecType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// コンテナ内で見つかったひとつのエレメンタリーストリームの情報
///
/// [`Default`] で生成したインスタンスは無効な値として扱われる
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// コンテナ内で一意なストリーム ID
    pub stream_id: u32,

    /// ストリームの種類
    pub codec_type: Option<CodecType>,

    /// コーデック名 ("pcm", "vorbis", "opus", "flac", "aac", "alac", "ulaw", "alaw" など)
    pub codec_name: String,

    /// コンテナ固有のコーデック識別子（WAV のフォーマットタグや MP4 のサンプルエントリー種別など）
    pub codec_tag: u32,

    /// サンプリングレート
    pub sample_rate: u32,

    /// チャンネル数
    pub channels: u16,

    /// サンプルあたりのビット数
    pub bits_per_sample: u16,

    /// ビットレート（bps、不明な場合は 0）
    pub bitrate: u32,

    /// デコーダーに渡すコーデック固有の設定データ
    pub codec_data: Vec<u8>,

    /// サンプル単位の尺（不明な場合は 0）
    pub duration_samples: u64,

    /// ミリ秒単位の尺（不明な場合は 0）
    pub duration_ms: u64,

    /// アーティスト名
    pub artist: String,

    /// タイトル
    pub title: String,

    /// アルバム名
    pub album: String,
}

impl StreamInfo {
    /// 有効なストリーム情報かどうか
    pub fn is_valid(&self) -> bool {
        self.stream_id != 0 && self.codec_type.is_some() && !self.codec_name.is_empty()
    }

    /// 音声ストリームかどうか
    pub fn is_audio(&self) -> bool {
        self.codec_type == Some(CodecType::Audio)
    }

    /// 映像ストリームかどうか
    pub fn is_video(&self) -> bool {
        self.codec_type == Some(CodecType::Video)
    }

    /// 字幕ストリームかどうか
    pub fn is_subtitle(&self) -> bool {
        self.codec_type == Some(CodecType::Subtitle)
    }
}

/// Demuxer が取り出した、ひとつのストリームのエンコード済みデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// 対応するストリームの ID
    pub stream_id: u32,

    /// ペイロード
    pub data: Vec<u8>,

    /// コンテナ固有の位置情報（主に Ogg のグラニュール位置）
    pub granule_position: u64,

    /// ストリームの先頭からのサンプル数で表したデコード位置
    pub timestamp_samples: u64,

    /// 単独でデコード可能なチャンクかどうか
    pub is_keyframe: bool,

    /// ファイル内でのペイロードの位置
    pub file_offset: u64,
}

impl MediaChunk {
    /// ストリーム ID とペイロードを指定してインスタンスを生成する
    pub fn new(stream_id: u32, data: Vec<u8>) -> Self {
        Self {
            stream_id,
            data,
            ..Self::default()
        }
    }

    /// 有効なチャンク（ペイロードが空でない）かどうか
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }

    /// ペイロードが空かどうか
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// ペイロードのバイト数
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// 全てのフィールドを初期値に戻す
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl Default for MediaChunk {
    fn default() -> Self {
        Self {
            stream_id: 0,
            data: Vec::new(),
            granule_position: 0,
            timestamp_samples: 0,
            is_keyframe: true,
            file_offset: 0,
        }
    }
}
