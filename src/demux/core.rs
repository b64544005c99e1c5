use std::{
    io::SeekFrom,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    MediaChunk, Result, StreamInfo,
    buffer_pool::BufferPool,
    error::{DemuxerError, ErrorCategory},
    io::IoHandler,
};

use super::DemuxerConfig;

/// コンテナ形式ごとの解析処理を表現するためのトレイト
///
/// [`DemuxerCore`] がロックや状態フラグ、エラーの変換を受け持ち、
/// 実装側はコンテナ構造の解釈だけを行う
pub trait ContainerFormat: Default + Send {
    /// コンテナ形式の名前
    const NAME: &'static str;

    /// コンテナ構造を読み込んで、ストリーム一覧と尺（ミリ秒）を返す
    ///
    /// 呼び出し時の `self` は常に [`Default`] で生成された状態となっている
    fn parse(
        &mut self,
        io: &mut dyn IoHandler,
        config: &DemuxerConfig,
    ) -> Result<(Vec<StreamInfo>, u64)>;

    /// 次のチャンクを読み込む
    ///
    /// `stream_id` が [`None`] の場合は形式ごとの既定のストリームを対象とする。
    /// 終端に達した場合には `Ok(None)` を返す。
    fn read_chunk(
        &mut self,
        io: &mut dyn IoHandler,
        pool: &BufferPool,
        stream_id: Option<u32>,
    ) -> Result<Option<MediaChunk>>;

    /// 指定のタイムスタンプ（ミリ秒）に読み込み位置を移動する
    fn seek(&mut self, io: &mut dyn IoHandler, timestamp_ms: u64) -> Result<()>;

    /// 現在の読み込み位置（ミリ秒）
    fn position_ms(&self) -> u64;

    /// 全てのストリームに、読み込み待ちのデータも未読のデータも残っていないかどうか
    ///
    /// [`ContainerFormat::read_chunk()`] が特定のストリームに対して `Ok(None)` を返した後に参照される。
    /// ストリームが一つしかない形式では、そのストリームの終端がコンテナの終端となる。
    fn is_drained(&self) -> bool {
        true
    }
}

/// バッファプールから取得したバッファに、指定位置からちょうど `len` バイトを読み込む
pub(crate) fn read_pooled(
    io: &mut dyn IoHandler,
    pool: &BufferPool,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    let mut data = pool.acquire(len);
    data.resize(len, 0);
    io.seek(SeekFrom::Start(offset))?;
    let n = io.read_fully(&mut data)?;
    if n < len {
        pool.release(data);
        return Err(crate::Error::truncated(format!(
            "Expected {len} bytes at offset {offset}, but only {n} bytes are available"
        )));
    }
    Ok(data)
}

struct CoreState<F> {
    io: Box<dyn IoHandler>,
    format: F,
    streams: Vec<StreamInfo>,
}

/// 全てのコンテナ形式で共通の Demuxer の実装
///
/// 解析状態は [`Mutex`] で保護され、`is_eof()` などの参照系のメソッドは
/// アトミック変数を読むだけなので、読み込みやシークと並行して呼び出してもブロックしない
pub struct DemuxerCore<F> {
    state: Mutex<CoreState<F>>,
    parsed: AtomicBool,
    eof: AtomicBool,
    // 尺以上の位置へのシークで EOF になっている
    past_end: AtomicBool,
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
    last_error: Mutex<Option<DemuxerError>>,
    pool: Arc<BufferPool>,
    config: DemuxerConfig,
}

impl<F: ContainerFormat> DemuxerCore<F> {
    /// 既定の設定でインスタンスを生成する
    pub fn new(io: Box<dyn IoHandler>, pool: Arc<BufferPool>) -> Self {
        Self::with_config(io, pool, DemuxerConfig::default())
    }

    /// 設定を指定してインスタンスを生成する
    pub fn with_config(io: Box<dyn IoHandler>, pool: Arc<BufferPool>, config: DemuxerConfig) -> Self {
        Self {
            state: Mutex::new(CoreState {
                io,
                format: F::default(),
                streams: Vec::new(),
            }),
            parsed: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            past_end: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
            pool,
            config,
        }
    }

    /// コンテナ形式の名前
    pub fn format_name(&self) -> &'static str {
        F::NAME
    }

    /// コンテナ構造を読み込む
    ///
    /// 失敗した場合は `false` を返し、ストリーム一覧は空のまま、エラー情報が記録される
    pub fn parse_container(&self) -> bool {
        let mut state = self.state.lock();
        let CoreState { io, format, streams } = &mut *state;

        self.parsed.store(false, Ordering::SeqCst);
        self.eof.store(false, Ordering::SeqCst);
        self.past_end.store(false, Ordering::SeqCst);
        self.position_ms.store(0, Ordering::SeqCst);
        self.duration_ms.store(0, Ordering::SeqCst);
        streams.clear();
        *format = F::default();

        let result = io
            .seek(SeekFrom::Start(0))
            .map_err(crate::Error::from)
            .and_then(|_| format.parse(io.as_mut(), &self.config));
        match result {
            Ok((found, _)) if found.is_empty() => {
                *format = F::default();
                self.set_error(DemuxerError::new(
                    ErrorCategory::MalformedHeader,
                    format!("No streams found in {} container", F::NAME),
                ));
                false
            }
            Ok((found, duration_ms)) => {
                log::debug!(
                    "Parsed {} container: {} stream(s), duration={duration_ms}ms",
                    F::NAME,
                    found.len()
                );
                *streams = found;
                self.duration_ms.store(duration_ms, Ordering::SeqCst);
                self.parsed.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                *format = F::default();
                log::debug!("Failed to parse {} container: {e}", F::NAME);
                self.set_error(DemuxerError::from(e).at_offset(io.tell()));
                false
            }
        }
    }

    /// ストリーム一覧を返す（解析前は空）
    pub fn streams(&self) -> Vec<StreamInfo> {
        if !self.is_parsed() {
            return Vec::new();
        }
        self.state.lock().streams.clone()
    }

    /// 指定のストリームの情報を返す
    ///
    /// 存在しない場合は [`StreamInfo::default()`] を返す
    pub fn stream_info(&self, stream_id: u32) -> StreamInfo {
        if !self.is_parsed() {
            return StreamInfo::default();
        }
        self.state
            .lock()
            .streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 既定のストリームから次のチャンクを読み込む
    ///
    /// 解析前や終端に達した後は空のチャンクを返す
    pub fn read_chunk(&self) -> MediaChunk {
        self.read_chunk_inner(None)
    }

    /// 指定のストリームから次のチャンクを読み込む
    ///
    /// そのストリームの終端に達した場合は空のチャンクを返す。
    /// EOF 状態になるのは、他のストリームにも読み込むデータが残っていない場合のみ。
    /// 既定のストリームが終端に達した後でも、他のストリームのデータは読み込める。
    pub fn read_chunk_from(&self, stream_id: u32) -> MediaChunk {
        self.read_chunk_inner(Some(stream_id))
    }

    fn read_chunk_inner(&self, stream_id: Option<u32>) -> MediaChunk {
        if !self.is_parsed() {
            return MediaChunk::default();
        }
        if self.is_eof() && (stream_id.is_none() || self.past_end.load(Ordering::SeqCst)) {
            return MediaChunk::default();
        }

        let mut state = self.state.lock();
        let CoreState { io, format, streams } = &mut *state;
        if let Some(id) = stream_id
            && !streams.iter().any(|s| s.stream_id == id)
        {
            log::debug!("Unknown stream id {id} requested from {} demuxer", F::NAME);
            return MediaChunk::default();
        }

        match format.read_chunk(io.as_mut(), &self.pool, stream_id) {
            Ok(Some(chunk)) => {
                self.position_ms.store(format.position_ms(), Ordering::SeqCst);
                chunk
            }
            Ok(None) => match stream_id {
                Some(id) if !format.is_drained() => {
                    log::debug!("Reached the end of stream {id} in {} container", F::NAME);
                    MediaChunk::default()
                }
                _ => {
                    log::debug!("Reached the end of {} stream", F::NAME);
                    self.eof.store(true, Ordering::SeqCst);
                    MediaChunk::default()
                }
            },
            Err(e) => {
                let e = DemuxerError::from(e).at_offset(io.tell());
                if e.category == ErrorCategory::TruncatedData {
                    self.eof.store(true, Ordering::SeqCst);
                }
                self.set_error(e);
                MediaChunk::default()
            }
        }
    }

    /// 指定のタイムスタンプ（ミリ秒）にシークする
    ///
    /// 尺以上の位置が指定された場合は、位置を尺に合わせて EOF 状態にした上で `true` を返す。
    /// 解析前の場合や I/O エラーが発生した場合には `false` を返す。
    pub fn seek_to(&self, timestamp_ms: u64) -> bool {
        if !self.is_parsed() {
            return false;
        }

        let mut state = self.state.lock();
        let duration_ms = self.duration();
        if duration_ms > 0 && timestamp_ms >= duration_ms {
            log::debug!(
                "Seek target {timestamp_ms}ms is at or beyond duration {duration_ms}ms; marking EOF"
            );
            self.position_ms.store(duration_ms, Ordering::SeqCst);
            self.eof.store(true, Ordering::SeqCst);
            self.past_end.store(true, Ordering::SeqCst);
            return true;
        }

        let CoreState { io, format, .. } = &mut *state;
        match format.seek(io.as_mut(), timestamp_ms) {
            Ok(()) => {
                self.eof.store(false, Ordering::SeqCst);
                self.past_end.store(false, Ordering::SeqCst);
                self.position_ms.store(format.position_ms(), Ordering::SeqCst);
                true
            }
            Err(e) => {
                self.set_error(DemuxerError::from(e).at_offset(io.tell()));
                false
            }
        }
    }

    /// 尺（ミリ秒、解析前や不明な場合は 0）
    pub fn duration(&self) -> u64 {
        self.duration_ms.load(Ordering::SeqCst)
    }

    /// 現在位置（ミリ秒）
    pub fn position(&self) -> u64 {
        self.position_ms.load(Ordering::SeqCst)
    }

    /// 終端に達しているかどうか
    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    /// コンテナの解析に成功しているかどうか
    pub fn is_parsed(&self) -> bool {
        self.parsed.load(Ordering::SeqCst)
    }

    /// エラーが記録されているかどうか
    pub fn has_error(&self) -> bool {
        self.last_error.lock().is_some()
    }

    /// 最後に記録されたエラー
    pub fn last_error(&self) -> Option<DemuxerError> {
        self.last_error.lock().clone()
    }

    /// 記録されているエラーを消去する
    pub fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    /// チャンクの確保に使われるバッファプール
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// 設定
    pub fn config(&self) -> &DemuxerConfig {
        &self.config
    }

    /// 入力ソースを閉じる
    ///
    /// 以降の読み込みやシークは失敗する
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        match state.io.close() {
            Ok(()) => true,
            Err(e) => {
                self.set_error(e.into());
                false
            }
        }
    }

    fn set_error(&self, e: DemuxerError) {
        log::debug!("{} demuxer error: {e}", F::NAME);
        *self.last_error.lock() = Some(e);
    }

    /// 状態をロックして形式固有の処理を実行する
    ///
    /// 解析前の場合は [`None`] を返す
    pub(crate) fn with_format<R>(
        &self,
        f: impl FnOnce(&mut dyn IoHandler, &mut F) -> Result<R>,
    ) -> Option<R> {
        if !self.is_parsed() {
            return None;
        }
        let mut state = self.state.lock();
        let CoreState { io, format, .. } = &mut *state;
        match f(io.as_mut(), format) {
            Ok(v) => Some(v),
            Err(e) => {
                self.set_error(DemuxerError::from(e).at_offset(io.tell()));
                None
            }
        }
    }

    /// 形式固有の処理の結果で位置と EOF 状態を更新する
    pub(crate) fn sync_position(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::SeqCst);
        self.eof.store(false, Ordering::SeqCst);
        self.past_end.store(false, Ordering::SeqCst);
    }
}

impl<F> core::fmt::Debug for DemuxerCore<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DemuxerCore")
            .field("parsed", &self.parsed.load(Ordering::Relaxed))
            .field("eof", &self.eof.load(Ordering::Relaxed))
            .field("position_ms", &self.position_ms.load(Ordering::Relaxed))
            .field("duration_ms", &self.duration_ms.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
