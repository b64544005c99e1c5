use std::{cmp::Ordering, num::NonZeroU32};

use crate::{
    BoxHeader, BoxSize, BoxType, CodecType, Decode, Error, ErrorKind, MediaChunk, Result,
    StreamInfo,
    aux::SampleTableAccessor,
    boxes::{AudioSampleEntry, FtypBox, HdlrBox, MoovBox, SampleEntry, TrakBox},
    buffer_pool::BufferPool,
    compliance::{
        CodecKind, ContainerFamily, TrackAudioInfo, validate_32bit_box_size,
        validate_64bit_box_size, validate_codec_data_integrity, validate_sample_table_consistency,
        validate_timestamp_configuration,
    },
    io::IoHandler,
    riff::InfoTags,
};

use super::{ContainerFormat, DemuxerConfig, core::read_pooled};

const MDAT: BoxType = BoxType::Normal(*b"mdat");
const MOOF: BoxType = BoxType::Normal(*b"moof");
const UDTA: BoxType = BoxType::Normal(*b"udta");
const META: BoxType = BoxType::Normal(*b"meta");
const ILST: BoxType = BoxType::Normal(*b"ilst");
const DATA: BoxType = BoxType::Normal(*b"data");

/// 一度に読み込む ftyp ボックスのサイズ上限
const MAX_FTYP_SIZE: u64 = 4096;

/// 一度に読み込む moov ボックスのサイズ上限
const MAX_MOOV_SIZE: u64 = 256 * 1024 * 1024;

/// ひとつのサンプルとして扱うバイト数の上限
const MAX_SAMPLE_SIZE: u64 = 64 * 1024 * 1024;

/// 複数サンプルをまとめて読み込むコーデック
const GROUPED_CODECS: [&str; 3] = ["pcm", "ulaw", "alaw"];

#[derive(Debug)]
struct IsoTrack {
    stream_id: u32,
    codec_type: CodecType,
    timescale: u32,
    sample_rate: u32,
    table: SampleTableAccessor,

    // 1 始まりで、サンプル数を越えたら終端
    next_sample: u32,
    samples_per_read: u32,
}

impl IsoTrack {
    fn is_finished(&self) -> bool {
        self.next_sample > self.table.sample_count()
    }

    fn next_time(&self) -> u64 {
        NonZeroU32::new(self.next_sample)
            .and_then(|s| self.table.sample_decode_time(s))
            .unwrap_or(self.table.total_duration())
    }

    fn to_ms(&self, time: u64) -> u64 {
        if self.timescale == 0 {
            return 0;
        }
        (time as u128 * 1000 / self.timescale as u128) as u64
    }

    /// タイムスケール単位の時刻をサンプリングレート単位に変換する
    fn to_samples(&self, time: u64) -> u64 {
        if self.sample_rate == 0 || self.timescale == 0 || self.sample_rate == self.timescale {
            return time;
        }
        (time as u128 * self.sample_rate as u128 / self.timescale as u128) as u64
    }

    fn cmp_next_time(&self, other: &Self) -> Ordering {
        let a = self.next_time() as u128 * other.timescale.max(1) as u128;
        let b = other.next_time() as u128 * self.timescale.max(1) as u128;
        a.cmp(&b)
    }
}

/// ISO BMFF (MP4 / M4A / MOV / 3GP) の解析状態
///
/// フラグメント化された MP4 (`moof`) は扱わず、`moov` 内のサンプルテーブルだけを使う
#[derive(Debug, Default)]
pub struct IsoFormat {
    tracks: Vec<IsoTrack>,
    file_size: u64,
    position_ms: u64,
}

fn fourcc_name(box_type: BoxType) -> String {
    String::from_utf8_lossy(box_type.as_bytes())
        .trim_end()
        .to_ascii_lowercase()
}

fn fourcc_tag(box_type: BoxType) -> u32 {
    match box_type {
        BoxType::Normal(ty) => u32::from_be_bytes(ty),
        BoxType::Uuid(_) => 0,
    }
}

/// 子ボックス列の中から指定種別の最初のボックスのペイロードを返す
fn find_child(mut payload: &[u8], box_type: BoxType) -> Option<&[u8]> {
    while payload.len() >= BoxHeader::MIN_SIZE {
        let (header, child) = BoxHeader::decode_header_and_payload(payload).ok()?;
        if header.box_type == box_type {
            return Some(child);
        }
        let size = header.external_size() + child.len();
        payload = &payload[size..];
    }
    None
}

/// `udta/meta/ilst` の iTunes 形式のメタデータから、タイトルなどを取り出す
fn ilst_tags(moov: &MoovBox) -> InfoTags {
    let mut tags = InfoTags::default();
    let Some(udta) = moov.unknown_boxes.iter().find(|b| b.box_type == UDTA) else {
        return tags;
    };
    let Some(meta) = find_child(&udta.payload, META) else {
        return tags;
    };
    // MP4 の meta はフルボックスだが、QuickTime ではヘッダーなしで子ボックスが始まる
    let meta = if meta.get(4..8) == Some(b"hdlr".as_slice()) {
        meta
    } else {
        meta.get(4..).unwrap_or_default()
    };
    let Some(mut items) = find_child(meta, ILST) else {
        return tags;
    };

    while items.len() >= BoxHeader::MIN_SIZE {
        let Ok((header, item)) = BoxHeader::decode_header_and_payload(items) else {
            log::debug!("Stopped reading a broken 'ilst' box");
            break;
        };
        items = &items[header.external_size() + item.len()..];

        // data ボックスは type_indicator(4) と locale(4) の後ろに値が続く
        let Some(value) = find_child(item, DATA).and_then(|d| d.get(8..)) else {
            continue;
        };
        let value = String::from_utf8_lossy(value).trim_end_matches('\0').to_owned();
        match header.box_type.as_bytes() {
            [0xA9, b'n', b'a', b'm'] => tags.title = value,
            [0xA9, b'A', b'R', b'T'] => tags.artist = value,
            [0xA9, b'a', b'l', b'b'] => tags.album = value,
            _ => {}
        }
    }
    tags
}

fn audio_codec_name(entry: &AudioSampleEntry) -> String {
    match entry.box_type.as_bytes() {
        b"mp4a" => match &entry.esds_box {
            Some(esds) if esds.es.dec_config_descr.is_mp3() => "mp3".to_owned(),
            Some(esds) if !esds.es.dec_config_descr.is_aac() => "mp4a".to_owned(),
            _ => "aac".to_owned(),
        },
        b".mp3" => "mp3".to_owned(),
        b"alac" => "alac".to_owned(),
        b"Opus" => "opus".to_owned(),
        b"fLaC" => "flac".to_owned(),
        b"ulaw" => "ulaw".to_owned(),
        b"alaw" => "alaw".to_owned(),
        b"lpcm" | b"twos" | b"sowt" | b"raw " | b"in24" | b"in32" | b"fl32" | b"fl64" => {
            "pcm".to_owned()
        }
        _ => fourcc_name(entry.box_type),
    }
}

/// 音声のサンプルエントリーの内容をストリーム情報に反映する
fn describe_audio(entry: &AudioSampleEntry, timescale: u32, info: &mut StreamInfo) {
    info.codec_name = audio_codec_name(entry);
    info.channels = entry.audio.channelcount.min(u16::MAX as u32) as u16;
    info.bits_per_sample = entry.audio.samplesize.min(u16::MAX as u32) as u16;
    info.sample_rate = if entry.audio.samplerate != 0 {
        entry.audio.samplerate
    } else {
        timescale
    };

    match entry.box_type.as_bytes() {
        b"in24" => info.bits_per_sample = 24,
        b"in32" | b"fl32" => info.bits_per_sample = 32,
        b"fl64" => info.bits_per_sample = 64,
        b"ulaw" | b"alaw" | b"raw " => info.bits_per_sample = 8,
        _ => {}
    }

    if let Some(esds) = &entry.esds_box {
        let config = &esds.es.dec_config_descr;
        info.bitrate = config.avg_bitrate;
        if let Some(dsi) = &config.dec_specific_info {
            info.codec_data = dsi.payload.clone();
        }
    }
    if let Some(alac) = &entry.alac_box {
        if alac.sample_rate != 0 {
            info.sample_rate = alac.sample_rate;
        }
        info.channels = alac.num_channels as u16;
        info.bits_per_sample = alac.bit_depth as u16;
        info.bitrate = alac.avg_bit_rate;
        info.codec_data = alac.magic_cookie.clone();
    }
    if let Some(dops) = &entry.dops_box {
        // Opus は常に 48 kHz で復号される
        info.sample_rate = 48000;
        info.channels = dops.output_channel_count as u16;
        info.codec_data = dops.to_opus_head();
    }
    if let Some(dfla) = &entry.dfla_box {
        info.codec_data = dfla.streaminfo().to_vec();
    }
    if info.codec_name == "pcm" || info.codec_name == "ulaw" || info.codec_name == "alaw" {
        info.bitrate = info
            .sample_rate
            .saturating_mul(info.channels as u32)
            .saturating_mul(info.bits_per_sample as u32);
    }
}

fn validate_audio_config(entry: &AudioSampleEntry, info: &StreamInfo) -> Result<()> {
    let kind = match CodecKind::from_fourcc(fourcc_tag(entry.box_type).to_be_bytes()) {
        CodecKind::Aac if info.codec_name != "aac" => CodecKind::Other,
        kind => kind,
    };
    let track = TrackAudioInfo {
        sample_rate: info.sample_rate,
        channel_count: info.channels as u32,
        bits_per_sample: info.bits_per_sample as u32,
    };
    validate_codec_data_integrity(kind, &info.codec_data, &track)
}

impl IsoFormat {
    /// トップレベルのボックスを走査して ftyp と moov を取り出す
    fn read_top_level(&self, io: &mut dyn IoHandler) -> Result<MoovBox> {
        let mut offset = 0;
        let mut moov = None;
        let mut ftyp_seen = false;
        let mut fragmented = false;

        while offset + BoxHeader::MIN_SIZE as u64 <= self.file_size {
            let buf = io.read_up_to_at(offset, BoxHeader::MAX_SIZE)?;
            let (header, header_size) = BoxHeader::decode(&buf)?;
            let checked = match header.box_size {
                BoxSize::U32(size) => validate_32bit_box_size(size, offset, self.file_size),
                BoxSize::U64(size) => validate_64bit_box_size(size, offset, self.file_size),
            };
            let end = match (header.box_size.get(), checked) {
                (0, _) => self.file_size,
                (size, Ok(())) => offset + size,
                (_, Err(e)) if header.box_type == MDAT && e.kind == ErrorKind::InsufficientBuffer => {
                    log::warn!(
                        "Clamping 'mdat' box at offset {offset} to the end of the file: {}",
                        e.reason
                    );
                    self.file_size
                }
                (_, Err(e)) => return Err(e.with_box_type(header.box_type)),
            };
            log::trace!(
                "Found top-level box {} at offset {offset} ({} bytes)",
                header.box_type,
                end - offset
            );

            match header.box_type {
                FtypBox::TYPE if !ftyp_seen => {
                    ftyp_seen = true;
                    let payload_start = offset + header_size as u64;
                    if end - payload_start > MAX_FTYP_SIZE {
                        return Err(Error::invalid_data(format!(
                            "Too large 'ftyp' box: {} bytes",
                            end - offset
                        )));
                    }
                    let payload = io.read_exact_at(payload_start, (end - payload_start) as usize)?;
                    let ftyp = FtypBox::decode_payload(&payload)?;
                    match ftyp.brands().find_map(ContainerFamily::from_brand) {
                        Some(family) => log::debug!(
                            "ISO file family {family:?} (major brand {:?})",
                            ftyp.major_brand
                        ),
                        None => log::warn!(
                            "Unknown ftyp brands: major={:?}, compatible={:?}",
                            ftyp.major_brand,
                            ftyp.compatible_brands
                        ),
                    }
                }
                MoovBox::TYPE if moov.is_none() => {
                    if end - offset > MAX_MOOV_SIZE {
                        return Err(Error::unsupported(format!(
                            "Too large 'moov' box: {} bytes",
                            end - offset
                        )));
                    }
                    let bytes = io.read_exact_at(offset, (end - offset) as usize)?;
                    let (b, _) = MoovBox::decode(&bytes)?;
                    moov = Some(b);
                }
                MoovBox::TYPE => log::warn!("Ignoring duplicate 'moov' box at offset {offset}"),
                MOOF if !fragmented => {
                    fragmented = true;
                    log::warn!("Ignoring movie fragments; only the 'moov' sample tables are read");
                }
                _ => {}
            }

            if header.box_size.get() == 0 {
                break;
            }
            offset = end;
        }

        if !ftyp_seen {
            log::debug!("No 'ftyp' box found; assuming a QuickTime file");
        }
        moov.ok_or_else(|| Error::invalid_data("Missing 'moov' box"))
    }

    fn build_track(
        &self,
        index: usize,
        trak: &TrakBox,
        config: &DemuxerConfig,
        used_ids: &[u32],
    ) -> Result<Option<(IsoTrack, StreamInfo)>> {
        let handler = trak.mdia_box.hdlr_box.handler_type;
        let codec_type = match handler {
            HdlrBox::HANDLER_TYPE_SOUN => CodecType::Audio,
            HdlrBox::HANDLER_TYPE_VIDE => CodecType::Video,
            h if HdlrBox::HANDLER_TYPES_SUBTITLE.contains(&h) => CodecType::Subtitle,
            _ => {
                log::debug!(
                    "Skipping track #{index} with handler '{}'",
                    String::from_utf8_lossy(&handler)
                );
                return Ok(None);
            }
        };

        let mdhd = &trak.mdia_box.mdhd_box;
        let stbl = &trak.mdia_box.minf_box.stbl_box;
        let checked = validate_timestamp_configuration(0, mdhd.timescale, mdhd.duration)
            .and_then(|()| validate_sample_table_consistency(stbl))
            .and_then(|()| {
                SampleTableAccessor::new(stbl).map_err(|e| Error::invalid_data(e.to_string()))
            });
        let table = match checked {
            Ok(table) => table,
            Err(e) if codec_type != CodecType::Audio => {
                log::warn!("Skipping {codec_type} track #{index}: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e.with_box_type(TrakBox::TYPE)),
        };
        let Some(entry) = stbl.stsd_box.entries.first() else {
            return Err(Error::invalid_data("Empty 'stsd' box").with_box_type(TrakBox::TYPE));
        };

        let mut stream_id = match trak.tkhd_box.track_id {
            0 => index as u32 + 1,
            id => id,
        };
        while used_ids.contains(&stream_id) {
            stream_id = stream_id.wrapping_add(1).max(1);
        }

        let entry_type = match entry {
            SampleEntry::Audio(b) => b.box_type,
            SampleEntry::Unknown(b) => b.box_type,
        };
        let mut info = StreamInfo {
            stream_id,
            codec_type: Some(codec_type),
            codec_name: fourcc_name(entry_type),
            codec_tag: fourcc_tag(entry_type),
            ..StreamInfo::default()
        };
        if codec_type == CodecType::Audio {
            info.sample_rate = mdhd.timescale;
            if let Some(audio) = entry.as_audio() {
                describe_audio(audio, mdhd.timescale, &mut info);
                if config.validate_codec_config {
                    validate_audio_config(audio, &info).map_err(|e| e.with_box_type(entry_type))?;
                }
            }
        }

        let samples_per_read = match table.fixed_sample_size() {
            Some(size) if size > 0 && GROUPED_CODECS.contains(&info.codec_name.as_str()) => {
                (config.pcm_chunk_bytes / size as usize).clamp(1, u32::MAX as usize) as u32
            }
            _ => 1,
        };
        let track = IsoTrack {
            stream_id,
            codec_type,
            timescale: mdhd.timescale,
            sample_rate: info.sample_rate,
            table,
            next_sample: 1,
            samples_per_read,
        };

        let duration = match mdhd.duration {
            0 => track.table.total_duration(),
            d => d,
        };
        info.duration_ms = track.to_ms(duration);
        info.duration_samples = track.to_samples(duration);
        log::debug!(
            "ISO track #{index}: id={stream_id}, type={codec_type}, codec={}, samples={}, timescale={}",
            info.codec_name,
            track.table.sample_count(),
            track.timescale
        );
        Ok(Some((track, info)))
    }

    fn primary_track(&self) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.codec_type == CodecType::Audio)
            .or_else(|| (!self.tracks.is_empty()).then_some(0))
    }

    /// 既定の読み込み対象として、次のデコード時刻が最も早い音声トラックを選ぶ
    fn next_interleaved(&self) -> Option<usize> {
        let has_audio = self.tracks.iter().any(|t| t.codec_type == CodecType::Audio);
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_finished() && (!has_audio || t.codec_type == CodecType::Audio))
            .min_by(|(_, a), (_, b)| a.cmp_next_time(b))
            .map(|(i, _)| i)
    }
}

impl ContainerFormat for IsoFormat {
    const NAME: &'static str = "iso";

    fn parse(
        &mut self,
        io: &mut dyn IoHandler,
        config: &DemuxerConfig,
    ) -> Result<(Vec<StreamInfo>, u64)> {
        self.file_size = crate::io::source_size(io)?;
        let moov = self.read_top_level(io)?;
        let tags = ilst_tags(&moov);

        let mut streams: Vec<StreamInfo> = Vec::new();
        for (index, trak) in moov.trak_boxes.iter().enumerate() {
            let used_ids = streams.iter().map(|s| s.stream_id).collect::<Vec<_>>();
            let Some((track, mut info)) = self.build_track(index, trak, config, &used_ids)? else {
                continue;
            };
            info.title = tags.title.clone();
            info.artist = tags.artist.clone();
            info.album = tags.album.clone();
            self.tracks.push(track);
            streams.push(info);
        }

        let audio_duration = streams
            .iter()
            .filter(|s| s.is_audio())
            .map(|s| s.duration_ms)
            .max();
        let duration_ms = match audio_duration.or(streams.iter().map(|s| s.duration_ms).max()) {
            Some(d) if d > 0 => d,
            _ if moov.mvhd_box.timescale > 0 => {
                (moov.mvhd_box.duration as u128 * 1000 / moov.mvhd_box.timescale as u128) as u64
            }
            _ => 0,
        };
        Ok((streams, duration_ms))
    }

    fn read_chunk(
        &mut self,
        io: &mut dyn IoHandler,
        pool: &BufferPool,
        stream_id: Option<u32>,
    ) -> Result<Option<MediaChunk>> {
        let index = match stream_id {
            Some(id) => self.tracks.iter().position(|t| t.stream_id == id),
            None => self.next_interleaved(),
        };
        let Some(track) = index.and_then(|i| self.tracks.get_mut(i)) else {
            return Ok(None);
        };

        loop {
            let Some(sample) = NonZeroU32::new(track.next_sample) else {
                return Ok(None);
            };
            if track.is_finished() {
                return Ok(None);
            }
            let table = &track.table;
            let (chunk, index_in_chunk) = table.sample_chunk(sample).ok_or_else(|| {
                Error::invalid_data(format!("Sample #{sample} is not mapped to any chunk"))
            })?;
            let left_in_chunk = table
                .chunk_sample_count(chunk)
                .unwrap_or(1)
                .saturating_sub(index_in_chunk)
                .max(1);
            let left_in_track = table.sample_count() - sample.get() + 1;
            let count = track
                .samples_per_read
                .min(left_in_chunk)
                .min(left_in_track);

            let offset = table
                .sample_offset(sample)
                .ok_or_else(|| Error::invalid_data(format!("No offset for sample #{sample}")))?;
            let mut size = 0u64;
            for s in sample.get()..sample.get() + count {
                let n = NonZeroU32::new(s).and_then(|s| table.sample_size(s)).unwrap_or(0);
                size += n as u64;
            }
            let decode_time = table.sample_decode_time(sample).unwrap_or(0);
            let is_keyframe = table.is_sync_sample(sample).unwrap_or(true);
            track.next_sample += count;

            if size == 0 {
                log::trace!("Skipping empty sample #{sample} of track {}", track.stream_id);
                continue;
            }
            if size > MAX_SAMPLE_SIZE {
                return Err(Error::invalid_data(format!(
                    "Too large sample #{sample} in track {}: {size} bytes",
                    track.stream_id
                )));
            }
            if offset.saturating_add(size) > self.file_size {
                return Err(Error::truncated(format!(
                    "Sample #{sample} at offset {offset} ({size} bytes) exceeds the file size {}",
                    self.file_size
                )));
            }

            let data = read_pooled(io, pool, offset, size as usize)?;
            self.position_ms = track.to_ms(track.next_time());
            return Ok(Some(MediaChunk {
                stream_id: track.stream_id,
                data,
                granule_position: decode_time,
                timestamp_samples: track.to_samples(decode_time),
                is_keyframe,
                file_offset: offset,
            }));
        }
    }

    fn seek(&mut self, _io: &mut dyn IoHandler, timestamp_ms: u64) -> Result<()> {
        let primary = self.primary_track();
        let mut position_ms = 0;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            let target = (timestamp_ms as u128 * track.timescale as u128 / 1000) as u64;
            let Some(mut sample) = track.table.find_sample_at_or_before(target) else {
                track.next_sample = 1;
                continue;
            };
            while track.table.is_sync_sample(sample) == Some(false) {
                match NonZeroU32::new(sample.get() - 1) {
                    Some(prev) => sample = prev,
                    None => break,
                }
            }
            track.next_sample = sample.get();

            let time = track.table.sample_decode_time(sample).unwrap_or(0);
            if Some(i) == primary {
                position_ms = track.to_ms(time);
            }
            log::debug!(
                "ISO seek to {timestamp_ms}ms: track {} lands on sample #{sample} ({}ms)",
                track.stream_id,
                track.to_ms(time)
            );
        }
        self.position_ms = position_ms;
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.tracks.iter().all(|t| t.is_finished())
    }

    fn position_ms(&self) -> u64 {
        self.position_ms
    }
}
