use crate::{
    CodecType, Decode, Error, ErrorKind, MediaChunk, Result, StreamInfo,
    buffer_pool::BufferPool,
    flac::{
        FLAC_MARKER, FrameHeader, MetadataBlockHeader, SeekPoint, StreamInfoBlock, VorbisComment,
        decode_seek_table, id3v2_tag_size,
    },
    io::IoHandler,
    ogg::granule::samples_to_ms,
};

use super::{ContainerFormat, DemuxerConfig, core::read_pooled};

const STREAM_ID: u32 = 1;

/// 同期コードを探す際に一度に読み込むバイト数
const SCAN_WINDOW: u64 = 64 * 1024;

/// 読み込むメタデータブロックのサイズ上限
const MAX_METADATA_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// ネイティブ FLAC ストリームの解析状態
#[derive(Debug, Default)]
pub struct FlacFormat {
    info: StreamInfoBlock,
    seek_table: Vec<SeekPoint>,
    audio_start: u64,
    file_size: u64,
    total_samples: u64,
    max_frame_bytes: usize,
    cursor: u64,
    position_sample: u64,
}

impl FlacFormat {
    fn first_sample(&self, header: &FrameHeader) -> u64 {
        header.first_sample(self.info.max_block_size as u32)
    }

    fn valid_header(&self, buf: &[u8]) -> Option<FrameHeader> {
        match FrameHeader::parse(buf) {
            Ok(h) if h.is_consistent_with(&self.info) => Some(h),
            Ok(_) => None,
            Err(e) => {
                if e.kind != ErrorKind::InsufficientBuffer {
                    log::trace!("Rejected FLAC frame sync candidate: {}", e.reason);
                }
                None
            }
        }
    }

    fn header_at(&self, io: &mut dyn IoHandler, offset: u64) -> Result<Option<FrameHeader>> {
        let buf = io.read_up_to_at(offset, FrameHeader::MAX_SIZE)?;
        Ok(self.valid_header(&buf))
    }

    /// `[from, limit)` の範囲で `accept` を満たす最初のフレームヘッダーを探す
    fn scan_frames(
        &self,
        io: &mut dyn IoHandler,
        from: u64,
        limit: u64,
        accept: impl Fn(&FrameHeader) -> bool,
    ) -> Result<Option<(u64, FrameHeader)>> {
        let limit = limit.min(self.file_size);
        let mut pos = from;
        while pos < limit {
            let window = (limit - pos).min(SCAN_WINDOW) as usize;
            let buf = io.read_up_to_at(pos, window + FrameHeader::MAX_SIZE)?;
            let scan_len = window.min(buf.len());
            for i in 0..scan_len {
                if !FrameHeader::is_sync(&buf[i..]) {
                    continue;
                }
                if let Some(h) = self.valid_header(&buf[i..])
                    && accept(&h)
                {
                    return Ok(Some((pos + i as u64, h)));
                }
            }
            pos += window as u64;
        }
        Ok(None)
    }

    /// `offset` から始まるフレームの次のフレームの位置を返す
    ///
    /// 後続のフレームは番号が連続していることで判定する。見つからない場合は [`None`]
    fn next_frame(
        &self,
        io: &mut dyn IoHandler,
        offset: u64,
        header: &FrameHeader,
    ) -> Result<Option<u64>> {
        let expected = if header.variable_block_size {
            header.coded_number + header.block_size as u64
        } else {
            header.coded_number + 1
        };
        let skip = (header.header_size as u64).max(self.info.min_frame_size as u64);
        let limit = offset + self.max_frame_bytes as u64 + 1;
        let found = self.scan_frames(io, offset + skip, limit, |h| {
            h.variable_block_size == header.variable_block_size && h.coded_number == expected
        })?;
        Ok(found.map(|(o, _)| o))
    }

    /// 次のフレームの終端（次のフレームがなければ、ファイル終端かフレームサイズの上限）
    fn frame_end(&self, io: &mut dyn IoHandler, offset: u64, header: &FrameHeader) -> Result<u64> {
        if let Some(next) = self.next_frame(io, offset, header)? {
            return Ok(next);
        }
        let cap = offset + self.max_frame_bytes as u64;
        if self.file_size > cap {
            log::warn!(
                "No FLAC frame follows the frame at offset {offset} within {} bytes",
                self.max_frame_bytes
            );
            return Ok(cap);
        }
        Ok(self.file_size)
    }

    /// `offset` 以降で最初の正しいフレームを返す
    fn frame_from(&self, io: &mut dyn IoHandler, offset: u64) -> Result<Option<(u64, FrameHeader)>> {
        if let Some(h) = self.header_at(io, offset)? {
            return Ok(Some((offset, h)));
        }
        let found = self.scan_frames(io, offset, self.file_size, |_| true)?;
        if let Some((o, _)) = &found {
            log::warn!("Lost FLAC frame sync; skipped {} bytes at offset {offset}", o - offset);
        }
        Ok(found)
    }

    /// 末尾のフレームから総サンプル数を推定する
    fn estimate_total_samples(&self, io: &mut dyn IoHandler) -> Result<u64> {
        let tail = SCAN_WINDOW.max(self.info.max_frame_size as u64 * 2);
        let mut pos = self.file_size.saturating_sub(tail).max(self.audio_start);
        let mut last = None;
        while let Some((offset, h)) = self.scan_frames(io, pos, self.file_size, |_| true)? {
            last = Some(h);
            pos = offset + 1;
        }
        Ok(last.map_or(0, |h| self.first_sample(&h) + h.block_size as u64))
    }

    /// 目標サンプル以前から始まるフレームの位置を、シークテーブルか比例推定で求める
    fn seek_start(&self, io: &mut dyn IoHandler, target: u64) -> Result<u64> {
        if let Some(point) = self
            .seek_table
            .iter()
            .rev()
            .find(|p| p.sample_number <= target)
        {
            let offset = self.audio_start + point.stream_offset;
            if let Some(h) = self.header_at(io, offset)?
                && self.first_sample(&h) <= target
            {
                log::debug!(
                    "Using FLAC seek point: sample={} offset={offset}",
                    point.sample_number
                );
                return Ok(offset);
            }
            log::warn!("FLAC seek point does not point to a valid frame: offset={offset}");
        }

        if self.total_samples == 0 {
            return Ok(self.audio_start);
        }
        let data_size = self.file_size - self.audio_start;
        let estimate =
            (data_size as u128 * target as u128 / self.total_samples as u128) as u64;
        let mut probe = self.audio_start + estimate.min(data_size);
        let mut step = (self.info.max_frame_size as u64).max(4096);
        loop {
            if let Some((offset, h)) = self.scan_frames(io, probe, self.file_size, |_| true)?
                && self.first_sample(&h) <= target
            {
                return Ok(offset);
            }
            if probe <= self.audio_start {
                return Ok(self.audio_start);
            }
            probe = probe.saturating_sub(step).max(self.audio_start);
            step = step.saturating_mul(2);
        }
    }
}

impl ContainerFormat for FlacFormat {
    const NAME: &'static str = "flac";

    fn parse(
        &mut self,
        io: &mut dyn IoHandler,
        config: &DemuxerConfig,
    ) -> Result<(Vec<StreamInfo>, u64)> {
        self.file_size = crate::io::source_size(io)?;
        self.max_frame_bytes = config.max_flac_frame_bytes.max(FrameHeader::MAX_SIZE);

        let head = io.read_up_to_at(0, 10)?;
        let mut offset = match id3v2_tag_size(&head) {
            Some(size) => {
                log::debug!("Skipping {size} byte ID3v2 tag");
                size
            }
            None => 0,
        };
        let marker = io.read_exact_at(offset, 4)?;
        if marker != FLAC_MARKER {
            return Err(Error::invalid_data("Missing fLaC stream marker"));
        }
        offset += 4;

        let mut info = None;
        let mut codec_data = Vec::new();
        let mut comment = None;
        loop {
            let buf = io.read_exact_at(offset, MetadataBlockHeader::SIZE)?;
            let (block, _) = MetadataBlockHeader::decode(&buf)?;
            let payload_start = offset + MetadataBlockHeader::SIZE as u64;
            let payload_end = payload_start + block.length as u64;
            if payload_end > self.file_size {
                return Err(Error::truncated(format!(
                    "FLAC metadata block type {} at offset {offset} exceeds the end of the source",
                    block.block_type
                )));
            }
            if info.is_none() && block.block_type != MetadataBlockHeader::BLOCK_TYPE_STREAMINFO {
                return Err(Error::invalid_data(
                    "First FLAC metadata block is not STREAMINFO",
                ));
            }
            log::trace!(
                "FLAC metadata block: type={} offset={offset} length={}",
                block.block_type,
                block.length
            );

            let read_payload = |io: &mut dyn IoHandler| -> Result<Vec<u8>> {
                if block.length > MAX_METADATA_BLOCK_SIZE {
                    return Err(Error::invalid_data(format!(
                        "Too large FLAC metadata block: {} bytes",
                        block.length
                    )));
                }
                Ok(io.read_exact_at(payload_start, block.length as usize)?)
            };
            match block.block_type {
                MetadataBlockHeader::BLOCK_TYPE_STREAMINFO => {
                    if info.is_some() {
                        return Err(Error::invalid_data("Duplicate STREAMINFO block"));
                    }
                    let payload = read_payload(io)?;
                    let (parsed, size) = StreamInfoBlock::decode(&payload)?;
                    codec_data = payload[..size].to_vec();
                    info = Some(parsed);
                }
                MetadataBlockHeader::BLOCK_TYPE_SEEKTABLE => {
                    self.seek_table = decode_seek_table(&read_payload(io)?)?;
                }
                MetadataBlockHeader::BLOCK_TYPE_VORBIS_COMMENT => {
                    match VorbisComment::decode(&read_payload(io)?) {
                        Ok((c, _)) => comment = Some(c),
                        Err(e) => log::warn!("Ignoring malformed VORBIS_COMMENT: {}", e.reason),
                    }
                }
                _ => {}
            }

            offset = payload_end;
            if block.is_last {
                break;
            }
        }

        self.info = info.ok_or_else(|| Error::invalid_data("Missing STREAMINFO block"))?;
        self.audio_start = offset;
        self.cursor = offset;

        if self.header_at(io, offset)?.is_none() {
            log::warn!("No FLAC frame starts right after the metadata (offset {offset})");
        }

        self.total_samples = self.info.total_samples;
        if self.total_samples == 0 {
            self.total_samples = self.estimate_total_samples(io)?;
            log::debug!(
                "STREAMINFO has no sample count; estimated {} from the last frame",
                self.total_samples
            );
        }

        let duration_ms = samples_to_ms(self.total_samples, self.info.sample_rate);
        let data_size = self.file_size - self.audio_start;
        let bitrate = if duration_ms > 0 {
            (data_size as u128 * 8000 / duration_ms as u128).min(u32::MAX as u128) as u32
        } else {
            0
        };

        let mut stream = StreamInfo {
            stream_id: STREAM_ID,
            codec_type: Some(CodecType::Audio),
            codec_name: "flac".to_owned(),
            codec_tag: u32::from_be_bytes(FLAC_MARKER),
            sample_rate: self.info.sample_rate,
            channels: self.info.channels as u16,
            bits_per_sample: self.info.bits_per_sample as u16,
            bitrate,
            codec_data,
            duration_samples: self.total_samples,
            duration_ms,
            ..StreamInfo::default()
        };
        if let Some(c) = &comment {
            c.apply_to(&mut stream);
        }

        log::debug!(
            "FLAC: rate={} channels={} bits={} samples={} seek_points={} audio_start={}",
            self.info.sample_rate,
            self.info.channels,
            self.info.bits_per_sample,
            self.total_samples,
            self.seek_table.len(),
            self.audio_start
        );
        Ok((vec![stream], duration_ms))
    }

    fn read_chunk(
        &mut self,
        io: &mut dyn IoHandler,
        pool: &BufferPool,
        _stream_id: Option<u32>,
    ) -> Result<Option<MediaChunk>> {
        if self.cursor >= self.file_size {
            return Ok(None);
        }
        let Some((offset, header)) = self.frame_from(io, self.cursor)? else {
            self.cursor = self.file_size;
            return Ok(None);
        };
        let end = self.frame_end(io, offset, &header)?;
        let data = read_pooled(io, pool, offset, (end - offset) as usize)?;

        let first = self.first_sample(&header);
        self.cursor = end;
        self.position_sample = first + header.block_size as u64;
        Ok(Some(MediaChunk {
            timestamp_samples: first,
            file_offset: offset,
            ..MediaChunk::new(STREAM_ID, data)
        }))
    }

    fn seek(&mut self, io: &mut dyn IoHandler, timestamp_ms: u64) -> Result<()> {
        let target =
            (timestamp_ms as u128 * self.info.sample_rate as u128 / 1000).min(u64::MAX as u128) as u64;
        let mut offset = self.seek_start(io, target)?;

        loop {
            let Some((frame_offset, header)) = self.frame_from(io, offset)? else {
                self.cursor = self.file_size;
                self.position_sample = self.total_samples;
                return Ok(());
            };
            let first = self.first_sample(&header);
            let end = self.frame_end(io, frame_offset, &header)?;
            if first + header.block_size as u64 > target || end >= self.file_size {
                log::debug!(
                    "FLAC seek to sample {target}: landed at offset {frame_offset} (sample {first})"
                );
                self.cursor = frame_offset;
                self.position_sample = first;
                return Ok(());
            }
            offset = end;
        }
    }

    fn position_ms(&self) -> u64 {
        samples_to_ms(self.position_sample, self.info.sample_rate)
    }
}
