use crate::{
    CodecType, Decode, Error, MediaChunk, Result, StreamInfo,
    aiff::{self, CommChunk, SsndHeader},
    buffer_pool::BufferPool,
    io::IoHandler,
    ogg::granule::samples_to_ms,
    riff::{self, InfoTags, WaveFormat},
};

use super::{ContainerFormat, DemuxerConfig};

/// RIFF / AIFF 共に、ストリームは常にひとつ
const STREAM_ID: u32 = 1;

/// 圧縮形式の場合に一度に読み込むブロック数の下限
const MIN_COMPRESSED_BLOCKS_PER_CHUNK: usize = 64;

/// 一度に読み込むメタデータ系チャンクのサイズ上限
const MAX_METADATA_CHUNK_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Layout {
    #[default]
    Riff,
    Aiff,
}

/// RIFF / WAVE と AIFF / AIFF-C の解析状態
#[derive(Debug, Default)]
pub struct ChunkFormat {
    layout: Layout,
    sample_rate: u32,
    block_align: u32,
    byte_rate: u32,
    is_pcm: bool,
    read_size: usize,
    data_start: u64,
    data_end: u64,
    cursor: u64,
}

struct ChunkWalk<'a> {
    io: &'a mut dyn IoHandler,
    offset: u64,
    end: u64,
    big_endian: bool,
}

impl ChunkWalk<'_> {
    /// 次のチャンクのヘッダーと、ペイロードの範囲を返す
    ///
    /// ペイロードが外側のチャンクの範囲を越える場合はエラーになる
    fn next(&mut self) -> Result<Option<([u8; 4], u64, u32)>> {
        if self.offset + 8 > self.end {
            if self.offset < self.end {
                log::debug!(
                    "Ignoring {} trailing bytes at offset {}",
                    self.end - self.offset,
                    self.offset
                );
            }
            return Ok(None);
        }
        let buf = self.io.read_exact_at(self.offset, 8)?;
        let (id, size, padded) = if self.big_endian {
            let (h, _) = aiff::ChunkHeader::decode(&buf)?;
            (h.id, h.size, h.padded_size())
        } else {
            let (h, _) = riff::ChunkHeader::decode(&buf)?;
            (h.id, h.size, h.padded_size())
        };

        let payload_start = self.offset + 8;
        let payload_end = payload_start + size as u64;
        if payload_end > self.end {
            return Err(Error::truncated(format!(
                "Chunk '{}' at offset {} declares {size} bytes, but only {} bytes remain",
                fourcc(&id),
                self.offset,
                self.end - payload_start
            )));
        }
        log::trace!(
            "Found chunk '{}' at offset {} ({size} bytes)",
            fourcc(&id),
            self.offset
        );
        self.offset = payload_start + padded;
        Ok(Some((id, payload_start, size)))
    }

    fn payload(&mut self, id: &[u8; 4], start: u64, size: u32) -> Result<Vec<u8>> {
        if size > MAX_METADATA_CHUNK_SIZE {
            return Err(Error::invalid_data(format!(
                "Too large '{}' chunk: {size} bytes",
                fourcc(id)
            )));
        }
        Ok(self.io.read_exact_at(start, size as usize)?)
    }
}

fn fourcc(id: &[u8; 4]) -> String {
    id.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

impl ChunkFormat {
    fn parse_riff(
        &mut self,
        walk: &mut ChunkWalk<'_>,
        config: &DemuxerConfig,
    ) -> Result<StreamInfo> {
        let mut format = None;
        let mut fact_samples = None;
        let mut tags = InfoTags::default();
        let mut data = None;

        while let Some((id, start, size)) = walk.next()? {
            match &id {
                b"fmt " => {
                    let payload = walk.payload(&id, start, size)?;
                    format = Some(WaveFormat::decode_payload(&payload)?);
                }
                b"fact" if size >= 4 => {
                    let payload = walk.payload(&id, start, size)?;
                    fact_samples = Some(u32::from_le_bytes([
                        payload[0], payload[1], payload[2], payload[3],
                    ]));
                }
                b"LIST" => {
                    let payload = walk.payload(&id, start, size)?;
                    tags = InfoTags::decode_list_payload(&payload);
                }
                b"data" => {
                    if data.is_some() {
                        log::warn!("Ignoring extra 'data' chunk at offset {}", start - 8);
                    } else {
                        data = Some((start, size as u64));
                    }
                }
                _ => {}
            }
        }

        let format = format.ok_or_else(|| Error::invalid_data("Missing 'fmt ' chunk"))?;
        let (data_start, data_size) =
            data.ok_or_else(|| Error::invalid_data("Missing 'data' chunk"))?;

        let mut block_align = format.block_align as u32;
        if block_align == 0 && format.is_pcm() {
            block_align = (format.bits_per_sample as u32).div_ceil(8) * format.channels as u32;
        }
        if block_align == 0 {
            return Err(Error::invalid_data("Block alignment in 'fmt ' chunk is zero"));
        }

        self.layout = Layout::Riff;
        self.sample_rate = format.sample_rate;
        self.block_align = block_align;
        self.byte_rate = format.byte_rate;
        self.is_pcm = format.is_pcm();
        self.data_start = data_start;
        self.data_end = data_start + data_size;
        self.read_size = self.chunk_read_size(config);

        let duration_samples = match fact_samples {
            Some(n) if n > 0 && !self.is_pcm => n as u64,
            _ if self.is_pcm => data_size / block_align as u64,
            _ if format.byte_rate > 0 => {
                (data_size as u128 * format.sample_rate as u128 / format.byte_rate as u128) as u64
            }
            _ => 0,
        };

        log::debug!(
            "WAVE: codec={} tag={:#06x} rate={} channels={} bits={} block_align={} data={}+{}",
            format.codec_name(),
            format.effective_format_tag(),
            format.sample_rate,
            format.channels,
            format.bits_per_sample,
            block_align,
            data_start,
            data_size
        );

        Ok(StreamInfo {
            stream_id: STREAM_ID,
            codec_type: Some(CodecType::Audio),
            codec_name: format.codec_name().to_owned(),
            codec_tag: format.effective_format_tag() as u32,
            sample_rate: format.sample_rate,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
            bitrate: format.byte_rate.saturating_mul(8),
            codec_data: format.extra,
            duration_samples,
            duration_ms: samples_to_ms(duration_samples, format.sample_rate),
            artist: tags.artist,
            title: tags.title,
            album: tags.album,
        })
    }

    fn parse_aiff(
        &mut self,
        walk: &mut ChunkWalk<'_>,
        config: &DemuxerConfig,
        is_aifc: bool,
    ) -> Result<StreamInfo> {
        let mut comm = None;
        let mut sound = None;
        let mut info = StreamInfo::default();

        while let Some((id, start, size)) = walk.next()? {
            match &id {
                b"COMM" => {
                    let payload = walk.payload(&id, start, size)?;
                    comm = Some(CommChunk::decode_payload(&payload, is_aifc)?);
                }
                b"SSND" => {
                    if (size as usize) < SsndHeader::SIZE {
                        return Err(Error::invalid_data(format!(
                            "Too short 'SSND' chunk: {size} bytes"
                        )));
                    }
                    let buf = walk.io.read_exact_at(start, SsndHeader::SIZE)?;
                    let (header, _) = SsndHeader::decode(&buf)?;
                    let sound_start = start + SsndHeader::SIZE as u64 + header.offset as u64;
                    let sound_end = start + size as u64;
                    if sound_start > sound_end {
                        return Err(Error::invalid_data(format!(
                            "SSND offset {} exceeds the chunk size {size}",
                            header.offset
                        )));
                    }
                    sound = Some((sound_start, sound_end));
                }
                b"NAME" => {
                    info.title = riff::text_value(&walk.payload(&id, start, size)?);
                }
                b"AUTH" => {
                    info.artist = riff::text_value(&walk.payload(&id, start, size)?);
                }
                b"ANNO" => {
                    let note = riff::text_value(&walk.payload(&id, start, size)?);
                    log::debug!("AIFF annotation: {note}");
                }
                _ => {}
            }
        }

        let comm = comm.ok_or_else(|| Error::invalid_data("Missing 'COMM' chunk"))?;
        let (sound_start, sound_end) =
            sound.ok_or_else(|| Error::invalid_data("Missing 'SSND' chunk"))?;
        let frame_bytes = comm.frame_bytes();
        if frame_bytes == 0 {
            return Err(Error::unsupported(format!(
                "Unsupported AIFF-C compression type: '{}'",
                fourcc(&comm.compression_type)
            )));
        }

        self.layout = Layout::Aiff;
        self.sample_rate = comm.sample_rate_hz();
        self.block_align = frame_bytes;
        self.byte_rate = self.sample_rate.saturating_mul(frame_bytes);
        self.is_pcm = true;
        self.data_start = sound_start;
        self.data_end = sound_end;
        self.read_size = self.chunk_read_size(config);

        let available_frames = (sound_end - sound_start) / frame_bytes as u64;
        if (comm.sample_frames as u64) > available_frames {
            log::warn!(
                "COMM declares {} sample frames, but SSND holds only {available_frames}",
                comm.sample_frames
            );
        }
        let duration_samples = (comm.sample_frames as u64).min(available_frames);
        self.data_end = sound_start + duration_samples * frame_bytes as u64;

        log::debug!(
            "AIFF: codec={} compression='{}' rate={} channels={} bits={} frames={}",
            comm.codec_name(),
            fourcc(&comm.compression_type),
            self.sample_rate,
            comm.channels,
            comm.sample_size,
            comm.sample_frames
        );

        Ok(StreamInfo {
            stream_id: STREAM_ID,
            codec_type: Some(CodecType::Audio),
            codec_name: comm.codec_name().to_owned(),
            codec_tag: u32::from_be_bytes(comm.compression_type),
            sample_rate: self.sample_rate,
            channels: comm.channels,
            bits_per_sample: comm.sample_size,
            bitrate: self.byte_rate.saturating_mul(8),
            duration_samples,
            duration_ms: samples_to_ms(duration_samples, self.sample_rate),
            ..info
        })
    }

    fn chunk_read_size(&self, config: &DemuxerConfig) -> usize {
        let block = self.block_align as usize;
        let target = if self.is_pcm {
            config.pcm_chunk_bytes
        } else {
            config
                .pcm_chunk_bytes
                .max(block * MIN_COMPRESSED_BLOCKS_PER_CHUNK)
        };
        (target / block).max(1) * block
    }

    fn elapsed_samples(&self, offset: u64) -> u64 {
        let bytes = offset.saturating_sub(self.data_start);
        if self.is_pcm {
            bytes / self.block_align as u64
        } else if self.byte_rate > 0 {
            (bytes as u128 * self.sample_rate as u128 / self.byte_rate as u128) as u64
        } else {
            0
        }
    }
}

impl ContainerFormat for ChunkFormat {
    const NAME: &'static str = "chunk";

    fn parse(
        &mut self,
        io: &mut dyn IoHandler,
        config: &DemuxerConfig,
    ) -> Result<(Vec<StreamInfo>, u64)> {
        let header = io.read_exact_at(0, 12)?;
        let file_size = crate::io::source_size(io)?;
        let (container_id, form) = (&header[..4], &header[8..12]);

        let big_endian = if container_id == riff::RIFF_ID && form == riff::WAVE_ID {
            false
        } else if container_id == aiff::FORM_ID
            && (form == aiff::AIFF_ID || form == aiff::AIFC_ID)
        {
            true
        } else {
            return Err(Error::invalid_data(format!(
                "Not a RIFF/WAVE or AIFF file: '{}' / '{}'",
                String::from_utf8_lossy(container_id),
                String::from_utf8_lossy(form)
            )));
        };

        let size_bytes = [header[4], header[5], header[6], header[7]];
        let declared = if big_endian {
            u32::from_be_bytes(size_bytes)
        } else {
            u32::from_le_bytes(size_bytes)
        };
        let mut end = 8 + declared as u64;
        if end > file_size {
            log::warn!(
                "Container declares {end} bytes, but the source holds only {file_size}; clamping"
            );
            end = file_size;
        }

        let mut walk = ChunkWalk {
            io,
            offset: 12,
            end,
            big_endian,
        };
        let info = if big_endian {
            self.parse_aiff(&mut walk, config, form == aiff::AIFC_ID)?
        } else {
            self.parse_riff(&mut walk, config)?
        };
        self.cursor = self.data_start;
        let duration_ms = info.duration_ms;
        Ok((vec![info], duration_ms))
    }

    fn read_chunk(
        &mut self,
        io: &mut dyn IoHandler,
        pool: &BufferPool,
        _stream_id: Option<u32>,
    ) -> Result<Option<MediaChunk>> {
        if self.cursor >= self.data_end {
            return Ok(None);
        }
        let len = (self.data_end - self.cursor).min(self.read_size as u64) as usize;

        let mut data = pool.acquire(len);
        data.resize(len, 0);
        io.seek(std::io::SeekFrom::Start(self.cursor))?;
        let n = io.read_fully(&mut data)?;
        if n == 0 {
            return Err(Error::truncated(format!(
                "Sample data ends at offset {} before the declared end {}",
                self.cursor, self.data_end
            )));
        }
        data.truncate(n);

        let chunk = MediaChunk {
            timestamp_samples: self.elapsed_samples(self.cursor),
            file_offset: self.cursor,
            ..MediaChunk::new(STREAM_ID, data)
        };
        self.cursor += n as u64;
        Ok(Some(chunk))
    }

    fn seek(&mut self, _io: &mut dyn IoHandler, timestamp_ms: u64) -> Result<()> {
        let block = self.block_align as u64;
        let bytes = if self.is_pcm {
            let frames = (timestamp_ms as u128 * self.sample_rate as u128 / 1000) as u64;
            frames.saturating_mul(block)
        } else {
            let bytes = (timestamp_ms as u128 * self.byte_rate as u128 / 1000) as u64;
            bytes / block * block
        };
        self.cursor = self
            .data_start
            .saturating_add(bytes)
            .min(self.data_end);
        log::debug!(
            "Seek to {timestamp_ms}ms ({:?}): offset {}",
            self.layout,
            self.cursor
        );
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        samples_to_ms(self.elapsed_samples(self.cursor), self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{demux::ChunkDemuxer, io::MemoryIoHandler};

    fn riff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut b = id.to_vec();
        b.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        b.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            b.push(0);
        }
        b
    }

    fn pcm_fmt(channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut b = Vec::new();
        b.extend_from_slice(&1u16.to_le_bytes());
        b.extend_from_slice(&channels.to_le_bytes());
        b.extend_from_slice(&rate.to_le_bytes());
        b.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        b.extend_from_slice(&block_align.to_le_bytes());
        b.extend_from_slice(&bits.to_le_bytes());
        b
    }

    fn wav(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut b = b"RIFF".to_vec();
        b.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        b.extend_from_slice(b"WAVE");
        b.extend(body);
        b
    }

    fn aiff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut b = id.to_vec();
        b.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        b.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            b.push(0);
        }
        b
    }

    fn aiff(frames: u32, pcm: &[u8]) -> Vec<u8> {
        let mut comm = Vec::new();
        comm.extend_from_slice(&2u16.to_be_bytes());
        comm.extend_from_slice(&frames.to_be_bytes());
        comm.extend_from_slice(&16u16.to_be_bytes());
        comm.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);
        let mut ssnd = vec![0; 8];
        ssnd.extend_from_slice(pcm);

        let body = [
            aiff_chunk(b"COMM", &comm),
            aiff_chunk(b"NAME", b"Take 1"),
            aiff_chunk(b"SSND", &ssnd),
        ]
        .concat();
        let mut b = b"FORM".to_vec();
        b.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
        b.extend_from_slice(b"AIFF");
        b.extend(body);
        b
    }

    fn demuxer(data: Vec<u8>) -> ChunkDemuxer {
        ChunkDemuxer::new(
            Box::new(MemoryIoHandler::new(data)),
            Arc::new(BufferPool::default()),
        )
    }

    #[test]
    fn parse_pcm_wav() {
        let mut list = b"INFO".to_vec();
        list.extend(riff_chunk(b"INAM", b"Title\0"));
        list.extend(riff_chunk(b"IART", b"Artist"));
        let d = demuxer(wav(&[
            riff_chunk(b"fmt ", &pcm_fmt(2, 44100, 16)),
            riff_chunk(b"LIST", &list),
            riff_chunk(b"data", &vec![0; 176400]),
        ]));
        assert!(d.parse_container());

        let s = d.stream_info(1);
        assert_eq!(s.codec_name, "pcm");
        assert_eq!(s.codec_tag, 1);
        assert_eq!(s.sample_rate, 44100);
        assert_eq!(s.channels, 2);
        assert_eq!(s.bits_per_sample, 16);
        assert_eq!(s.bitrate, 1411200);
        assert_eq!(s.duration_samples, 44100);
        assert_eq!(s.title, "Title");
        assert_eq!(s.artist, "Artist");
        assert_eq!(d.duration(), 1000);
    }

    #[test]
    fn read_in_block_aligned_chunks() {
        // 3 バイト x 2 チャンネル = 6 バイトのブロック
        let d = demuxer(wav(&[
            riff_chunk(b"fmt ", &pcm_fmt(2, 8000, 24)),
            riff_chunk(b"data", &vec![0; 10000]),
        ]));
        assert!(d.parse_container());

        let first = d.read_chunk();
        assert_eq!(first.data_size(), 4092);
        assert_eq!(first.timestamp_samples, 0);
        let second = d.read_chunk();
        assert_eq!(second.timestamp_samples, 682);
        assert_eq!(second.file_offset, first.file_offset + 4092);

        let mut total = first.data_size() + second.data_size();
        loop {
            let chunk = d.read_chunk();
            if chunk.is_empty() {
                break;
            }
            total += chunk.data_size();
        }
        assert_eq!(total, 10000);
        assert!(d.is_eof());
    }

    #[test]
    fn seek_is_byte_exact() {
        let d = demuxer(wav(&[
            riff_chunk(b"fmt ", &pcm_fmt(1, 8000, 16)),
            riff_chunk(b"data", &vec![0; 16000]),
        ]));
        assert!(d.parse_container());
        assert_eq!(d.duration(), 1000);

        assert!(d.seek_to(250));
        assert_eq!(d.position(), 250);
        let chunk = d.read_chunk();
        assert_eq!(chunk.timestamp_samples, 2000);
        assert_eq!(chunk.file_offset, 44 + 4000);

        assert!(d.seek_to(5000));
        assert!(d.is_eof());
        assert!(d.read_chunk().is_empty());
        assert!(d.seek_to(500));
        assert!(!d.is_eof());
        assert_eq!(d.read_chunk().timestamp_samples, 4000);
    }

    #[test]
    fn compressed_wav_uses_fact_chunk() {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&riff::format_tag::MULAW.to_le_bytes());
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&8000u32.to_le_bytes());
        fmt.extend_from_slice(&8000u32.to_le_bytes());
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&8u16.to_le_bytes());
        let d = demuxer(wav(&[
            riff_chunk(b"fmt ", &fmt),
            riff_chunk(b"fact", &4000u32.to_le_bytes()),
            riff_chunk(b"data", &vec![0xFF; 4000]),
        ]));
        assert!(d.parse_container());
        let s = d.stream_info(1);
        assert_eq!(s.codec_name, "ulaw");
        assert_eq!(s.duration_samples, 4000);
        assert_eq!(d.duration(), 500);
    }

    #[test]
    fn odd_sized_chunks_are_padded() {
        let d = demuxer(wav(&[
            riff_chunk(b"junk", b"odd"),
            riff_chunk(b"fmt ", &pcm_fmt(1, 8000, 8)),
            riff_chunk(b"data", &[1, 2, 3]),
        ]));
        assert!(d.parse_container());
        assert_eq!(d.read_chunk().data, [1, 2, 3]);
    }

    #[test]
    fn reject_broken_wav() {
        // data チャンクがない
        let d = demuxer(wav(&[riff_chunk(b"fmt ", &pcm_fmt(1, 8000, 8))]));
        assert!(!d.parse_container());
        assert!(d.has_error());
        assert!(d.streams().is_empty());

        // サブチャンクが外側の範囲を越えている
        let mut data = wav(&[
            riff_chunk(b"fmt ", &pcm_fmt(1, 8000, 8)),
            riff_chunk(b"data", &[0; 16]),
        ]);
        let len = data.len();
        data[len - 20..len - 16].copy_from_slice(&1000u32.to_le_bytes());
        let d = demuxer(data);
        assert!(!d.parse_container());
        let e = d.last_error().unwrap();
        assert_eq!(e.category, crate::error::ErrorCategory::TruncatedData);
        assert!(!e.message.is_empty());

        // 別形式
        let d = demuxer(b"OggS\0\0\0\0\0\0\0\0\0\0\0\0".to_vec());
        assert!(!d.parse_container());
        assert_eq!(
            d.last_error().unwrap().category,
            crate::error::ErrorCategory::MalformedHeader
        );
    }

    #[test]
    fn oversized_riff_header_is_clamped() {
        let mut data = wav(&[
            riff_chunk(b"fmt ", &pcm_fmt(1, 8000, 8)),
            riff_chunk(b"data", &[0; 80]),
        ]);
        data[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let d = demuxer(data);
        assert!(d.parse_container());
        assert_eq!(d.duration(), 10);
    }

    #[test]
    fn parse_aiff() {
        let pcm: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        let d = demuxer(aiff(100, &pcm));
        assert!(d.parse_container());

        let s = d.stream_info(1);
        assert_eq!(s.codec_name, "pcm");
        assert_eq!(s.codec_tag, u32::from_be_bytes(*b"NONE"));
        assert_eq!(s.sample_rate, 44100);
        assert_eq!(s.channels, 2);
        assert_eq!(s.duration_samples, 100);
        assert_eq!(s.title, "Take 1");

        let chunk = d.read_chunk();
        assert_eq!(chunk.data, pcm);
        assert!(d.read_chunk().is_empty());
        assert!(d.is_eof());
    }

    #[test]
    fn aiff_frame_count_limits_data() {
        let d = demuxer(aiff(50, &[0; 400]));
        assert!(d.parse_container());
        assert_eq!(d.read_chunk().data_size(), 200);
        assert!(d.read_chunk().is_empty());
    }
}
