use std::{cmp::Ordering, collections::VecDeque};

use crate::{
    CodecType, Error, MediaChunk, Result, StreamInfo,
    buffer_pool::BufferPool,
    demux::{ContainerFormat, DemuxerConfig, OggDemuxer},
    flac::VorbisComment,
    io::IoHandler,
};

use super::{
    codecs::{self, IdentificationHeader, OggCodec},
    granule::{INVALID_GRANULE, granpos_cmp, ms_to_samples, samples_to_ms},
    page::{self, CHUNK_SIZE, OggPage},
};

/// 二分探索を打ち切る区間の幅
const MIN_BISECTION_INTERVAL: u64 = CHUNK_SIZE;

/// 二分探索の反復回数の上限
const MAX_BISECTION_ITERATIONS: usize = 50;

/// 後方探索で窓を広げていく際の上限
const MAX_BACKWARD_WINDOW: u64 = CHUNK_SIZE * 4;

/// 後方探索の反復回数の上限
const MAX_BACKWARD_ITERATIONS: usize = 10;

/// ひとつのストリームのキューに溜めておくパケット数の上限
const MAX_QUEUED_PACKETS: usize = 512;

/// Ogg の論理ストリームの状態
#[derive(Debug, Default, Clone)]
pub struct OggStream {
    /// 論理ストリームのシリアル番号
    pub serial_number: u32,

    /// コーデック
    pub codec: OggCodec,

    /// サンプリングレート（Opus のグラニュールは常に 48 kHz）
    pub sample_rate: u32,

    /// チャンネル数
    pub channels: u16,

    /// ストリーム末尾のグラニュール位置（不明な場合は 0）
    ///
    /// ヘッダーに記載がない場合は、解析時に末尾のページから求めた値が入る
    pub total_samples: u64,

    /// Opus のプリスキップ
    pub pre_skip: u64,

    /// ヘッダーに記載された総サンプル数（記載がない場合は 0）
    pub header_total_samples: u64,

    /// 全てのヘッダーパケットを受け取ったかどうか
    pub headers_complete: bool,

    ident: IdentificationHeader,
    comment: Option<VorbisComment>,
    header_packets: Vec<Vec<u8>>,
    headers_sent: usize,
    last_granule: i64,
    partial: Vec<u8>,
    queue: VecDeque<OggPacket>,
}

impl OggStream {
    fn new(serial_number: u32, ident: IdentificationHeader, packet: Vec<u8>) -> Self {
        let headers_complete = ident.header_packets == 1;
        Self {
            serial_number,
            codec: ident.codec,
            sample_rate: ident.sample_rate,
            channels: ident.channels,
            total_samples: ident.total_samples,
            header_total_samples: ident.total_samples,
            pre_skip: ident.pre_skip,
            headers_complete,
            ident,
            comment: None,
            header_packets: vec![packet],
            headers_sent: 0,
            last_granule: 0,
            partial: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// コーデック名
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// ストリームの種類
    pub fn codec_type(&self) -> CodecType {
        self.codec.codec_type()
    }

    fn is_audio(&self) -> bool {
        self.codec_type() == CodecType::Audio
    }

    /// ヘッダー収集中のパケットを受け取る
    ///
    /// データパケットだった場合は `false` を返す
    fn accept_header(&mut self, packet: &[u8]) -> bool {
        let expected = self.ident.header_packets;
        let is_header = if expected == 0 {
            codecs::is_header_packet(self.codec, packet)
        } else {
            self.header_packets.len() < expected
        };
        if !is_header {
            self.headers_complete = true;
            return false;
        }

        if let Some(comment) = codecs::parse_comment_packet(self.codec, packet) {
            self.comment = Some(comment);
        }
        self.header_packets.push(packet.to_vec());
        if expected != 0 && self.header_packets.len() >= expected {
            self.headers_complete = true;
        }
        true
    }

    fn granule_to_ms(&self, granule: u64) -> u64 {
        if granule == u64::MAX || self.sample_rate == 0 {
            return 0;
        }
        if self.codec == OggCodec::Opus {
            if granule <= self.pre_skip {
                return 0;
            }
            return samples_to_ms(granule - self.pre_skip, 48000);
        }
        samples_to_ms(granule, self.sample_rate)
    }

    fn ms_to_granule(&self, ms: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        if self.codec == OggCodec::Opus {
            return ms_to_samples(ms, 48000).saturating_add(self.pre_skip);
        }
        ms_to_samples(ms, self.sample_rate)
    }

    fn duration_samples(&self) -> u64 {
        if self.codec == OggCodec::Opus {
            self.total_samples.saturating_sub(self.pre_skip)
        } else {
            self.total_samples
        }
    }

    fn to_stream_info(&self, stream_id: u32) -> StreamInfo {
        let mut info = StreamInfo {
            stream_id,
            codec_type: Some(self.codec_type()),
            codec_name: self.codec_name().to_owned(),
            codec_tag: self.serial_number,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.ident.bits_per_sample,
            bitrate: self.ident.bitrate,
            codec_data: self.ident.codec_data.clone(),
            duration_samples: self.duration_samples(),
            duration_ms: self.granule_to_ms(self.total_samples),
            ..StreamInfo::default()
        };
        if let Some(comment) = &self.comment {
            comment.apply_to(&mut info);
        }
        info
    }

    fn reset_read_state(&mut self) {
        self.partial.clear();
        self.queue.clear();
    }
}

#[derive(Debug, Clone)]
struct OggPacket {
    data: Vec<u8>,
    granule: i64,
    file_offset: u64,
}

/// Ogg コンテナの解析状態
#[derive(Debug, Default)]
pub struct OggFormat {
    // ストリーム ID はインデックス + 1
    streams: Vec<OggStream>,
    data_start_offset: u64,
    cursor: u64,
    file_size: u64,
    max_granule_seen: i64,
}

impl OggFormat {
    fn index_of_serial(&self, serial: u32) -> Option<usize> {
        self.streams.iter().position(|s| s.serial_number == serial)
    }

    fn stream(&self, stream_id: u32) -> Option<&OggStream> {
        (stream_id as usize)
            .checked_sub(1)
            .and_then(|i| self.streams.get(i))
    }

    /// 読み込みやシークの基準となる音声ストリーム
    fn primary_index(&self) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.is_audio() && s.headers_complete)
    }

    /// 尺の推定に使う音声ストリーム（最も長いもの、なければ最初のもの）
    fn preferred_serial(&self) -> Option<u32> {
        self.streams
            .iter()
            .filter(|s| s.is_audio() && s.headers_complete)
            .max_by(|a, b| {
                a.total_samples
                    .cmp(&b.total_samples)
                    .then(Ordering::Greater)
            })
            .map(|s| s.serial_number)
    }

    /// 読み込み位置にあるページを取り出して、読み込み位置を進める
    fn fetch_page(&mut self, io: &mut dyn IoHandler) -> Result<Option<(u64, OggPage)>> {
        if self.cursor >= self.file_size {
            return Ok(None);
        }
        let found = match page::read_page_at(io, self.cursor)? {
            Some(p) => Some((self.cursor, p)),
            None => {
                let found = page::next_page(io, self.cursor, None)?;
                if let Some((offset, _)) = &found {
                    log::warn!(
                        "Lost Ogg sync; skipped {} bytes at offset {}",
                        offset - self.cursor,
                        self.cursor
                    );
                }
                found
            }
        };
        match found {
            Some((offset, p)) => {
                self.cursor = offset + p.total_size() as u64;
                Ok(Some((offset, p)))
            }
            None => {
                self.cursor = self.file_size;
                Ok(None)
            }
        }
    }

    /// ページ内のパケットを組み立てて返す
    ///
    /// 前のページから続く断片の先頭を持っていない場合（シーク直後など）、その断片は捨てる
    fn assemble_packets(stream: &mut OggStream, page: &OggPage) -> Vec<(Vec<u8>, bool)> {
        let spans = page.packet_spans();
        let completed = page.completed_packets();
        let mut packets = Vec::new();
        let mut completed_seen = 0;
        for (i, (range, complete)) in spans.into_iter().enumerate() {
            let fragment = &page.body[range];
            if i == 0 && page.is_continued() {
                if stream.partial.is_empty() {
                    log::trace!(
                        "Dropping continued packet fragment of stream {:#010x}",
                        stream.serial_number
                    );
                    if complete {
                        completed_seen += 1;
                    }
                    continue;
                }
            } else if !stream.partial.is_empty() {
                log::warn!(
                    "Discarding incomplete packet of stream {:#010x}",
                    stream.serial_number
                );
                stream.partial.clear();
            }

            stream.partial.extend_from_slice(fragment);
            if complete {
                completed_seen += 1;
                packets.push((
                    std::mem::take(&mut stream.partial),
                    completed_seen == completed,
                ));
            }
        }
        packets
    }

    /// データパケットをストリームのキューに積む
    fn enqueue_page(&mut self, offset: u64, page: &OggPage) {
        let Some(index) = self.index_of_serial(page.serial_number) else {
            log::trace!(
                "Ignoring page of unknown Ogg stream {:#010x}",
                page.serial_number
            );
            return;
        };
        if page.has_granule() && granpos_cmp(page.granule_position, self.max_granule_seen).is_gt() {
            self.max_granule_seen = page.granule_position;
        }

        let stream = &mut self.streams[index];
        for (data, is_last) in Self::assemble_packets(stream, page) {
            if stream.codec == OggCodec::Flac && codecs::is_header_packet(stream.codec, &data) {
                continue;
            }
            if stream.queue.len() >= MAX_QUEUED_PACKETS {
                stream.queue.pop_front();
                log::debug!(
                    "Packet queue of Ogg stream {:#010x} is full; dropping the oldest packet",
                    stream.serial_number
                );
            }
            stream.queue.push_back(OggPacket {
                data,
                granule: if is_last {
                    page.granule_position
                } else {
                    INVALID_GRANULE
                },
                file_offset: offset,
            });
        }
    }

    fn parse_headers(&mut self, io: &mut dyn IoHandler, config: &DemuxerConfig) -> Result<()> {
        let mut pages = 0;
        loop {
            if pages >= config.max_header_pages {
                return Err(Error::invalid_data(format!(
                    "Ogg headers are not complete within {pages} pages"
                )));
            }
            let Some((offset, page)) = self.fetch_page(io)? else {
                break;
            };
            pages += 1;

            if page.is_bos() {
                if self.index_of_serial(page.serial_number).is_some() {
                    return Err(Error::invalid_data(format!(
                        "Duplicate BOS page for Ogg stream {:#010x}",
                        page.serial_number
                    )));
                }
                let Some((range, true)) = page.packet_spans().into_iter().next() else {
                    return Err(Error::invalid_data(
                        "BOS page does not contain a complete packet",
                    ));
                };
                let packet = page.body[range].to_vec();
                let ident = IdentificationHeader::parse(&packet)?;
                log::debug!(
                    "Found Ogg stream {:#010x}: codec={}",
                    page.serial_number,
                    ident.codec.name()
                );
                self.streams
                    .push(OggStream::new(page.serial_number, ident, packet));
                continue;
            }
            if self.streams.is_empty() {
                return Err(Error::invalid_data("First Ogg page is not a BOS page"));
            }

            let Some(index) = self.index_of_serial(page.serial_number) else {
                log::debug!(
                    "Ignoring page of unknown Ogg stream {:#010x} while reading headers",
                    page.serial_number
                );
                continue;
            };
            let stream = &mut self.streams[index];
            let mut has_data = false;
            for (packet, _) in Self::assemble_packets(stream, &page) {
                if stream.headers_complete || !stream.accept_header(&packet) {
                    has_data = true;
                }
            }

            if self.streams.iter().all(|s| s.headers_complete) {
                self.data_start_offset = if has_data {
                    offset
                } else {
                    offset + page.total_size() as u64
                };
                return Ok(());
            }
        }

        // 終端に達した場合、ヘッダーが揃ったストリームだけを残す
        self.streams.retain(|s| s.headers_complete);
        if self.streams.is_empty() {
            return Err(Error::truncated(
                "Reached the end of the Ogg stream before headers were complete",
            ));
        }
        self.data_start_offset = self.file_size;
        Ok(())
    }

    /// 指定範囲の後方から、有効なグラニュール位置を持つ最後のページを探す
    ///
    /// 窓の大きさを倍々に広げながら探索する。
    /// `preferred` が指定されている場合はそのストリームのページを優先し、
    /// `strict` の場合は他のストリームの値を使わない。
    fn scan_last_granule(
        &self,
        io: &mut dyn IoHandler,
        start: u64,
        end: u64,
        preferred: Option<u32>,
        strict: bool,
    ) -> Result<Option<i64>> {
        let mut window_end = end;
        let mut window = CHUNK_SIZE;
        let mut fallback = None;
        for _ in 0..MAX_BACKWARD_ITERATIONS {
            if window_end <= start {
                break;
            }
            let window_start = window_end.saturating_sub(window).max(start);

            let mut last_any = None;
            let mut last_preferred = None;
            let mut pos = window_start;
            while let Some((offset, page)) = page::next_page(io, pos, Some(window_end))? {
                pos = offset + page.total_size() as u64;
                if !page.has_granule() {
                    continue;
                }
                last_any = Some(page.granule_position);
                if preferred == Some(page.serial_number) {
                    last_preferred = Some(page.granule_position);
                }
            }

            if last_preferred.is_some() {
                return Ok(last_preferred);
            }
            if preferred.is_none() && last_any.is_some() {
                return Ok(last_any);
            }
            if !strict && fallback.is_none() {
                fallback = last_any;
            }

            window_end = window_start;
            window = (window * 2).min(MAX_BACKWARD_WINDOW);
        }
        Ok(fallback)
    }

    /// ヘッダーに記載された総サンプル数のうち、尺が最も長くなるストリームの値
    pub(crate) fn last_granule_from_headers(&self) -> u64 {
        self.streams
            .iter()
            .filter(|s| s.is_audio() && s.headers_complete && s.header_total_samples > 0)
            .max_by_key(|s| s.granule_to_ms(s.header_total_samples))
            .map(|s| s.header_total_samples)
            .unwrap_or(0)
    }

    /// `[start, end)` の範囲を後方から探索して最後の有効なグラニュール位置を返す（見つからない場合は 0）
    pub(crate) fn scan_backward_for_last_granule(
        &self,
        io: &mut dyn IoHandler,
        start: u64,
        end: u64,
    ) -> Result<u64> {
        let end = end.min(self.file_size);
        let start = start.min(end);
        let granule = self.scan_last_granule(io, start, end, self.preferred_serial(), false)?;
        Ok(granule.map_or(0, |g| g as u64))
    }

    /// コンテナ全体の最後のグラニュール位置
    pub(crate) fn last_granule_position(&mut self, io: &mut dyn IoHandler) -> Result<u64> {
        let from_headers = self.last_granule_from_headers();
        if from_headers > 0 {
            return Ok(from_headers);
        }
        let scanned =
            self.scan_backward_for_last_granule(io, self.data_start_offset, self.file_size)?;
        if scanned > 0 && granpos_cmp(scanned as i64, self.max_granule_seen).is_gt() {
            self.max_granule_seen = scanned as i64;
        }
        Ok(scanned.max(self.max_granule_seen.max(0) as u64))
    }

    pub(crate) fn granule_to_ms(&self, granule: u64, stream_id: u32) -> u64 {
        self.stream(stream_id).map_or(0, |s| s.granule_to_ms(granule))
    }

    pub(crate) fn ms_to_granule(&self, ms: u64, stream_id: u32) -> u64 {
        self.stream(stream_id).map_or(0, |s| s.ms_to_granule(ms))
    }

    pub(crate) fn granule_position(&self, stream_id: u32) -> u64 {
        self.stream(stream_id)
            .map_or(0, |s| s.last_granule.max(0) as u64)
    }

    /// 対象のグラニュール位置以下で最も近いページを探して、そこに読み込み位置を移す
    ///
    /// 該当するページがない場合にはデータ部分の先頭に移動する
    pub(crate) fn seek_to_page(
        &mut self,
        io: &mut dyn IoHandler,
        target_granule: u64,
        stream_id: u32,
    ) -> Result<()> {
        let Some(stream) = self.stream(stream_id) else {
            return Err(Error::invalid_input(format!(
                "Unknown Ogg stream id: {stream_id}"
            )));
        };
        let serial = stream.serial_number;
        let target = target_granule.min(i64::MAX as u64) as i64;

        let mut begin = self.data_start_offset;
        let mut end = self.file_size;
        let mut best: Option<(u64, i64)> = None;
        let mut exact = false;

        let mut iterations = 0;
        while end.saturating_sub(begin) > MIN_BISECTION_INTERVAL
            && iterations < MAX_BISECTION_ITERATIONS
        {
            iterations += 1;
            let bisect = begin + (end - begin) / 2;

            let mut found = None;
            let mut pos = bisect;
            while let Some((offset, page)) = page::next_page(io, pos, Some(end))? {
                pos = offset + page.total_size() as u64;
                if page.serial_number == serial && page.has_granule() {
                    found = Some((offset, page));
                    break;
                }
            }
            let Some((offset, page)) = found else {
                end = bisect;
                continue;
            };

            log::trace!(
                "Bisection step {iterations}: offset={offset}, granule={}",
                page.granule_position
            );
            match granpos_cmp(page.granule_position, target) {
                Ordering::Less => {
                    begin = offset + page.total_size() as u64;
                    if best.is_none_or(|(_, g)| granpos_cmp(page.granule_position, g).is_gt()) {
                        best = Some((offset, page.granule_position));
                    }
                }
                Ordering::Greater => end = offset,
                Ordering::Equal => {
                    best = Some((offset, page.granule_position));
                    exact = true;
                    break;
                }
            }
        }

        if !exact {
            // 区間が十分狭くなったので線形に探す
            let mut pos = begin;
            while let Some((offset, page)) = page::next_page(io, pos, Some(end))? {
                pos = offset + page.total_size() as u64;
                if page.serial_number != serial || !page.has_granule() {
                    continue;
                }
                let cmp = granpos_cmp(page.granule_position, target);
                if cmp.is_le() {
                    best = Some((offset, page.granule_position));
                }
                if cmp.is_ge() {
                    break;
                }
            }
        }

        if best.is_none() {
            best = page::prev_page(io, end, Some(serial), self.data_start_offset)?
                .filter(|(_, p)| {
                    p.has_granule() && granpos_cmp(p.granule_position, target).is_le()
                })
                .map(|(offset, p)| (offset, p.granule_position));
        }

        let (offset, granule) = best.unwrap_or((self.data_start_offset, 0));
        log::debug!(
            "Ogg seek to granule {target_granule} of stream {stream_id}: landed at offset {offset} (granule {granule})"
        );

        self.cursor = offset;
        for (i, s) in self.streams.iter_mut().enumerate() {
            s.reset_read_state();
            s.headers_sent = s.header_packets.len();
            if i + 1 == stream_id as usize {
                s.last_granule = granule;
            }
        }
        Ok(())
    }

    /// 指定の論理ストリームの状態のスナップショット
    pub(crate) fn ogg_stream(&self, stream_id: u32) -> Option<OggStream> {
        self.stream(stream_id).cloned()
    }

    pub(crate) fn data_start_offset(&self) -> u64 {
        self.data_start_offset
    }
}

impl ContainerFormat for OggFormat {
    const NAME: &'static str = "ogg";

    fn parse(
        &mut self,
        io: &mut dyn IoHandler,
        config: &DemuxerConfig,
    ) -> Result<(Vec<StreamInfo>, u64)> {
        self.file_size = crate::io::source_size(io)?;
        self.cursor = 0;
        self.parse_headers(io, config)?;

        // ヘッダーに総サンプル数を持たないストリームは末尾のページから求める
        for i in 0..self.streams.len() {
            if self.streams[i].total_samples > 0 {
                continue;
            }
            let serial = self.streams[i].serial_number;
            let last = self.scan_last_granule(
                io,
                self.data_start_offset,
                self.file_size,
                Some(serial),
                true,
            )?;
            if let Some(g) = last.filter(|&g| g > 0) {
                self.streams[i].total_samples = g as u64;
            }
        }

        let primary = self.primary_index().map(|i| i as u32 + 1);
        let mut duration_ms = self
            .streams
            .iter()
            .map(|s| s.granule_to_ms(s.total_samples))
            .max()
            .unwrap_or(0);
        if duration_ms == 0
            && let Some(id) = primary
        {
            let last = self.last_granule_position(io)?;
            duration_ms = self.granule_to_ms(last, id);
        }

        for s in &mut self.streams {
            s.reset_read_state();
            s.last_granule = 0;
        }
        self.cursor = self.data_start_offset;

        let infos = self
            .streams
            .iter()
            .enumerate()
            .map(|(i, s)| s.to_stream_info(i as u32 + 1))
            .collect();
        Ok((infos, duration_ms))
    }

    fn read_chunk(
        &mut self,
        io: &mut dyn IoHandler,
        pool: &BufferPool,
        stream_id: Option<u32>,
    ) -> Result<Option<MediaChunk>> {
        let index = match stream_id {
            Some(id) => id as usize - 1,
            None => match self.primary_index() {
                Some(i) => i,
                None => return Ok(None),
            },
        };
        let chunk_stream_id = index as u32 + 1;

        // ヘッダーパケットは最初に一度だけ渡す
        let stream = &mut self.streams[index];
        if stream.headers_sent < stream.header_packets.len() {
            let packet = &stream.header_packets[stream.headers_sent];
            stream.headers_sent += 1;
            let mut data = pool.acquire(packet.len());
            data.extend_from_slice(packet);
            return Ok(Some(MediaChunk {
                granule_position: 0,
                ..MediaChunk::new(chunk_stream_id, data)
            }));
        }

        while self.streams[index].queue.is_empty() {
            let Some((offset, page)) = self.fetch_page(io)? else {
                return Ok(None);
            };
            self.enqueue_page(offset, &page);
        }

        let stream = &mut self.streams[index];
        let Some(packet) = stream.queue.pop_front() else {
            return Ok(None);
        };
        if packet.granule != INVALID_GRANULE {
            stream.last_granule = packet.granule;
        }
        let mut timestamp_samples = stream.last_granule.max(0) as u64;
        if stream.codec == OggCodec::Opus {
            timestamp_samples = timestamp_samples.saturating_sub(stream.pre_skip);
        }

        let mut data = pool.acquire(packet.data.len());
        data.extend_from_slice(&packet.data);
        Ok(Some(MediaChunk {
            stream_id: chunk_stream_id,
            data,
            granule_position: packet.granule as u64,
            timestamp_samples,
            is_keyframe: true,
            file_offset: packet.file_offset,
        }))
    }

    fn seek(&mut self, io: &mut dyn IoHandler, timestamp_ms: u64) -> Result<()> {
        let Some(index) = self.primary_index() else {
            return Err(Error::invalid_input("No Ogg audio stream to seek"));
        };
        let stream_id = index as u32 + 1;
        let target = self.streams[index].ms_to_granule(timestamp_ms);
        self.seek_to_page(io, target, stream_id)
    }

    fn is_drained(&self) -> bool {
        self.cursor >= self.file_size
            && self
                .streams
                .iter()
                .all(|s| s.queue.is_empty() && s.headers_sent >= s.header_packets.len())
    }

    fn position_ms(&self) -> u64 {
        self.primary_index()
            .map_or(0, |i| {
                let s = &self.streams[i];
                s.granule_to_ms(s.last_granule.max(0) as u64)
            })
    }
}

/// Ogg 固有の操作
impl OggDemuxer {
    /// グラニュール位置をミリ秒に変換する
    ///
    /// 未設定のグラニュール位置（`u64::MAX`）や未知のストリームに対しては 0 を返す
    pub fn granule_to_ms(&self, granule: u64, stream_id: u32) -> u64 {
        self.with_format(|_, f| Ok(f.granule_to_ms(granule, stream_id)))
            .unwrap_or(0)
    }

    /// ミリ秒をグラニュール位置に変換する
    pub fn ms_to_granule(&self, timestamp_ms: u64, stream_id: u32) -> u64 {
        self.with_format(|_, f| Ok(f.ms_to_granule(timestamp_ms, stream_id)))
            .unwrap_or(0)
    }

    /// ストリームの現在のグラニュール位置
    pub fn granule_position(&self, stream_id: u32) -> u64 {
        self.with_format(|_, f| Ok(f.granule_position(stream_id)))
            .unwrap_or(0)
    }

    /// ヘッダーに記載された最後のグラニュール位置（尺が最も長いストリームのもの）
    ///
    /// 末尾のページから求めた値は含まない。記載がない場合は 0 を返す。
    pub fn last_granule_from_headers(&self) -> u64 {
        self.with_format(|_, f| Ok(f.last_granule_from_headers()))
            .unwrap_or(0)
    }

    /// `[start, end)` の範囲を後方から探索して最後の有効なグラニュール位置を返す
    ///
    /// 範囲はファイルサイズに丸められる
    pub fn scan_backward_for_last_granule(&self, start: u64, end: u64) -> u64 {
        self.with_format(|io, f| f.scan_backward_for_last_granule(io, start, end))
            .unwrap_or(0)
    }

    /// コンテナ全体の最後のグラニュール位置
    pub fn last_granule_position(&self) -> u64 {
        self.with_format(|io, f| f.last_granule_position(io))
            .unwrap_or(0)
    }

    /// 指定ストリームのグラニュール位置以下で最も近いページに読み込み位置を移す
    pub fn seek_to_page(&self, target_granule: u64, stream_id: u32) -> bool {
        let position = self.with_format(|io, f| {
            f.seek_to_page(io, target_granule, stream_id)?;
            Ok(f.position_ms())
        });
        match position {
            Some(ms) => {
                self.sync_position(ms);
                true
            }
            None => false,
        }
    }

    /// 論理ストリームの状態
    pub fn ogg_stream(&self, stream_id: u32) -> Option<OggStream> {
        self.with_format(|_, f| Ok(f.ogg_stream(stream_id))).flatten()
    }

    /// 最初のデータページの位置
    pub fn data_start_offset(&self) -> u64 {
        self.with_format(|_, f| Ok(f.data_start_offset()))
            .unwrap_or(0)
    }
}
