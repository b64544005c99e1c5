//! ボックスのサイズやコーデック設定の妥当性を検証する関数群
//!
//! いずれの関数も I/O を行わず、与えられた値だけを見て判定する。
//! 検証に失敗した場合には理由つきの [`Error`] が返される。
use crate::{
    Error, Result,
    boxes::{Brand, FtypBox, StblBox},
};

/// 妥当とみなすタイムスケールの上限
pub const MAX_TIMESCALE: u32 = 1_000_000_000;

/// 32 ビットのボックスサイズが妥当かどうかを検証する
///
/// `size == 0` は「スコープの末尾まで」を意味するので妥当とみなす。
/// `size == 1` は 64 ビットサイズへの切り替えを意味するので、この関数では常にエラーとなる。
pub fn validate_32bit_box_size(size: u32, box_start: u64, container_end: u64) -> Result<()> {
    match size {
        0 => Ok(()),
        1 => Err(Error::invalid_data(
            "Box size 1 denotes a 64-bit size and is not valid as a 32-bit size",
        )),
        2..8 => Err(Error::invalid_data(format!(
            "Box size {size} is smaller than the 8-byte header"
        ))),
        _ => check_box_end(size as u64, box_start, container_end),
    }
}

/// 64 ビットのボックスサイズ（`largesize`）が妥当かどうかを検証する
pub fn validate_64bit_box_size(size: u64, box_start: u64, container_end: u64) -> Result<()> {
    match size {
        0 => Ok(()),
        1..16 => Err(Error::invalid_data(format!(
            "Box size {size} is smaller than the 16-byte extended header"
        ))),
        _ => check_box_end(size, box_start, container_end),
    }
}

fn check_box_end(size: u64, box_start: u64, container_end: u64) -> Result<()> {
    match box_start.checked_add(size) {
        Some(end) if end <= container_end => Ok(()),
        _ => Err(Error::truncated(format!(
            "Box at offset {box_start} with size {size} exceeds the container end {container_end}"
        ))),
    }
}

/// タイムスタンプとタイムスケールの組み合わせが妥当かどうかを検証する
pub fn validate_timestamp_configuration(timestamp: u64, timescale: u32, duration: u64) -> Result<()> {
    if timescale == 0 {
        return Err(Error::invalid_data("Timescale must not be zero"));
    }
    if timescale > MAX_TIMESCALE {
        return Err(Error::invalid_data(format!(
            "Implausibly large timescale: {timescale}"
        )));
    }
    if timestamp > duration {
        return Err(Error::invalid_data(format!(
            "Timestamp {timestamp} exceeds duration {duration}"
        )));
    }
    Ok(())
}

/// サンプルテーブル内の各ボックスの内容が互いに矛盾していないかを検証する
///
/// - stsc から導かれるサンプル総数が stsz のサンプル数と一致すること
/// - stts がカバーするサンプル数が stsz のサンプル数以上であること
/// - stsc の各エントリーの first_chunk が 1 以上かつチャンク数以下で、昇順に並んでいること
pub fn validate_sample_table_consistency(stbl_box: &StblBox) -> Result<()> {
    let sample_count = stbl_box.stsz_box.sample_count() as u64;
    let chunk_count = stbl_box.chunk_offsets().len() as u64;
    let entries = &stbl_box.stsc_box.entries;

    if sample_count == 0 || chunk_count == 0 || entries.is_empty() {
        return Err(Error::invalid_data(format!(
            "Empty sample table: samples={sample_count}, chunks={chunk_count}, stsc_entries={}",
            entries.len()
        )));
    }

    let mut implied = 0u64;
    let mut prev_first_chunk = 0u64;
    for (i, entry) in entries.iter().enumerate() {
        let first_chunk = entry.first_chunk as u64;
        if first_chunk == 0 || first_chunk > chunk_count || first_chunk <= prev_first_chunk {
            return Err(Error::invalid_data(format!(
                "Invalid first_chunk in stsc entry #{i}: {first_chunk} (chunk_count={chunk_count})"
            )));
        }
        let next_first_chunk = entries
            .get(i + 1)
            .map(|e| e.first_chunk as u64)
            .unwrap_or(chunk_count + 1)
            .min(chunk_count + 1);
        let chunks = next_first_chunk.saturating_sub(first_chunk);
        implied = implied.saturating_add(chunks.saturating_mul(entry.samples_per_chunk as u64));
        prev_first_chunk = first_chunk;
    }

    if implied != sample_count {
        return Err(Error::invalid_data(format!(
            "Sample count mismatch: stsc implies {implied}, stsz declares {sample_count}"
        )));
    }

    let timed = stbl_box.stts_box.total_sample_count();
    if timed < sample_count {
        return Err(Error::invalid_data(format!(
            "Sample count mismatch: stts covers {timed}, stsz declares {sample_count}"
        )));
    }

    Ok(())
}

/// コーデック設定の検証に使うトラック情報
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackAudioInfo {
    /// サンプリングレート
    pub sample_rate: u32,

    /// チャンネル数
    pub channel_count: u32,

    /// サンプルあたりのビット数
    pub bits_per_sample: u32,
}

/// 検証対象のコーデック
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// AAC (AudioSpecificConfig)
    Aac,

    /// Apple Lossless (magic cookie)
    Alac,

    /// G.711 μ-law
    Ulaw,

    /// G.711 A-law
    Alaw,

    /// リニア PCM
    Lpcm,

    /// 検証ルールを持たないコーデック
    Other,
}

impl CodecKind {
    /// サンプルエントリーの種別などに使われる四文字コードから判定する
    pub fn from_fourcc(fourcc: [u8; 4]) -> Self {
        match &fourcc {
            b"mp4a" => Self::Aac,
            b"alac" => Self::Alac,
            b"ulaw" => Self::Ulaw,
            b"alaw" => Self::Alaw,
            b"lpcm" => Self::Lpcm,
            _ => Self::Other,
        }
    }
}

/// AAC の AudioSpecificConfig の sampling_frequency_index に対応するサンプリングレート
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AAC_OBJECT_TYPES: [u8; 12] = [1, 2, 3, 4, 5, 6, 17, 19, 20, 22, 23, 29];

// SBR / PS を伴う HE-AAC 系のオブジェクト種別
const AAC_HE_OBJECT_TYPES: [u8; 2] = [5, 29];

/// コーデック固有の設定データが、トラック情報と矛盾していないかを検証する
///
/// 検証ルールを持たないコーデックは常に成功する
pub fn validate_codec_data_integrity(
    codec: CodecKind,
    config: &[u8],
    track: &TrackAudioInfo,
) -> Result<()> {
    match codec {
        CodecKind::Aac => validate_aac_config(config, track),
        CodecKind::Alac => validate_alac_cookie(config, track),
        CodecKind::Ulaw | CodecKind::Alaw => validate_telephony(track),
        CodecKind::Lpcm => validate_lpcm(track),
        CodecKind::Other => Ok(()),
    }
}

fn validate_aac_config(config: &[u8], track: &TrackAudioInfo) -> Result<()> {
    if config.len() < 2 {
        return Err(Error::unsupported(format!(
            "Too short AudioSpecificConfig: {} bytes",
            config.len()
        )));
    }

    let bits = u16::from_be_bytes([config[0], config[1]]);
    let object_type = (bits >> 11) as u8;
    let rate_index = ((bits >> 7) & 0b1111) as usize;
    let channel_config = ((bits >> 3) & 0b1111) as u32;

    if !AAC_OBJECT_TYPES.contains(&object_type) {
        return Err(Error::unsupported(format!(
            "Unsupported AAC audio object type: {object_type}"
        )));
    }

    if rate_index == 15 {
        // 明示的な 24 ビットのサンプリングレートが続き、チャンネル構成はその後ろにずれる
        let Some(head) = config.get(..5) else {
            return Err(Error::unsupported(
                "Too short AudioSpecificConfig for an explicit sampling frequency",
            ));
        };
        let bits = head.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let rate = ((bits >> 7) & 0xFF_FFFF) as u32;
        let explicit_channels = ((bits >> 3) & 0b1111) as u32;
        return check_aac_params(object_type, rate, explicit_channels, track);
    }

    let Some(&sample_rate) = AAC_SAMPLE_RATES.get(rate_index) else {
        return Err(Error::unsupported(format!(
            "Reserved AAC sampling frequency index: {rate_index}"
        )));
    };
    check_aac_params(object_type, sample_rate, channel_config, track)
}

fn check_aac_params(
    object_type: u8,
    sample_rate: u32,
    channel_config: u32,
    track: &TrackAudioInfo,
) -> Result<()> {
    let rate_matches = sample_rate == track.sample_rate
        || (AAC_HE_OBJECT_TYPES.contains(&object_type) && sample_rate * 2 == track.sample_rate);
    if !rate_matches {
        return Err(Error::unsupported(format!(
            "AAC sampling frequency {sample_rate} does not match the track sample rate {}",
            track.sample_rate
        )));
    }

    let channels = match channel_config {
        // 0 はプログラム構成要素で定義されるので、ここでは判定しない
        0 => return Ok(()),
        7 => 8,
        1..=6 => channel_config,
        _ => {
            return Err(Error::unsupported(format!(
                "Reserved AAC channel configuration: {channel_config}"
            )));
        }
    };
    if channels != track.channel_count {
        return Err(Error::unsupported(format!(
            "AAC channel configuration {channel_config} does not match the track channel count {}",
            track.channel_count
        )));
    }
    Ok(())
}

fn validate_alac_cookie(cookie: &[u8], track: &TrackAudioInfo) -> Result<()> {
    if cookie.len() < 24 {
        return Err(Error::unsupported(format!(
            "Too short ALAC magic cookie: {} bytes",
            cookie.len()
        )));
    }

    let declared = u32::from_be_bytes([cookie[0], cookie[1], cookie[2], cookie[3]]) as usize;
    if declared != cookie.len() {
        return Err(Error::unsupported(format!(
            "ALAC magic cookie size mismatch: declared={declared}, actual={}",
            cookie.len()
        )));
    }
    if &cookie[4..8] != b"alac" {
        return Err(Error::unsupported("ALAC magic cookie lacks the 'alac' tag"));
    }

    // size(4) + 'alac'(4) + version/flags(4) + frameLength(4) + compatibleVersion(1)
    let Some(&bit_depth) = cookie.get(17) else {
        return Err(Error::unsupported("Too short ALAC magic cookie for the bit depth"));
    };
    if bit_depth as u32 != track.bits_per_sample {
        return Err(Error::unsupported(format!(
            "ALAC bit depth {bit_depth} does not match the track bits per sample {}",
            track.bits_per_sample
        )));
    }
    Ok(())
}

fn validate_telephony(track: &TrackAudioInfo) -> Result<()> {
    if !matches!(track.sample_rate, 8000 | 16000)
        || track.channel_count != 1
        || track.bits_per_sample != 8
    {
        return Err(Error::unsupported(format!(
            "Unsupported G.711 parameters: rate={}, channels={}, bits={}",
            track.sample_rate, track.channel_count, track.bits_per_sample
        )));
    }
    Ok(())
}

fn validate_lpcm(track: &TrackAudioInfo) -> Result<()> {
    if !matches!(track.bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(Error::unsupported(format!(
            "Unsupported PCM bits per sample: {}",
            track.bits_per_sample
        )));
    }
    if !(1000..=768_000).contains(&track.sample_rate) {
        return Err(Error::unsupported(format!(
            "Unsupported PCM sample rate: {}",
            track.sample_rate
        )));
    }
    if !(1..=64).contains(&track.channel_count) {
        return Err(Error::unsupported(format!(
            "Unsupported PCM channel count: {}",
            track.channel_count
        )));
    }
    Ok(())
}

/// 想定するコンテナの系統
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFamily {
    /// MP4
    Mp4,

    /// iTunes 系の音声ファイル
    M4a,

    /// QuickTime
    Mov,

    /// 3GPP
    ThreeGp,
}

impl ContainerFamily {
    /// この系統で妥当とみなすブランド
    pub fn known_brands(self) -> &'static [Brand] {
        const MP4: &[Brand] = &[
            Brand::ISOM,
            Brand::new(*b"iso2"),
            Brand::new(*b"iso4"),
            Brand::new(*b"iso5"),
            Brand::new(*b"iso6"),
            Brand::MP41,
            Brand::MP42,
            Brand::new(*b"avc1"),
            Brand::new(*b"dash"),
        ];
        const M4A: &[Brand] = &[
            Brand::M4A,
            Brand::new(*b"M4B "),
            Brand::new(*b"M4P "),
            Brand::MP42,
            Brand::ISOM,
        ];
        const MOV: &[Brand] = &[Brand::QT];
        const THREE_GP: &[Brand] = &[
            Brand::THREE_GP4,
            Brand::new(*b"3gp5"),
            Brand::new(*b"3gp6"),
            Brand::new(*b"3g2a"),
            Brand::ISOM,
        ];
        match self {
            Self::Mp4 => MP4,
            Self::M4a => M4A,
            Self::Mov => MOV,
            Self::ThreeGp => THREE_GP,
        }
    }

    /// ブランドからコンテナの系統を推定する
    pub fn from_brand(brand: Brand) -> Option<Self> {
        [Self::M4a, Self::Mov, Self::ThreeGp, Self::Mp4]
            .into_iter()
            .find(|family| {
                // isom / mp42 は複数の系統に含まれるので MP4 を優先する
                if matches!(brand, Brand::ISOM | Brand::MP42) {
                    *family == Self::Mp4
                } else {
                    family.known_brands().contains(&brand)
                }
            })
    }
}

/// ftyp ボックスのペイロードが、想定する系統のブランドを含んでいるかを検証する
pub fn validate_container_compliance(ftyp_payload: &[u8], family: ContainerFamily) -> Result<()> {
    let ftyp = FtypBox::decode_payload(ftyp_payload)?;
    let known = family.known_brands();
    if ftyp.brands().any(|b| known.contains(&b)) {
        Ok(())
    } else {
        Err(Error::unsupported(format!(
            "No brand compatible with {family:?} in ftyp: major={:?}",
            ftyp.major_brand
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_size_boundaries() {
        assert!(validate_32bit_box_size(7, 0, 1000).is_err());
        assert!(validate_32bit_box_size(8, 0, 1000).is_ok());
        assert!(validate_32bit_box_size(1, 0, 1000).is_err());
        assert!(validate_32bit_box_size(0, 0, 1000).is_ok());
        assert!(validate_32bit_box_size(1000, 0, 1000).is_ok());
        assert!(validate_32bit_box_size(1001, 0, 1000).is_err());
        assert!(validate_32bit_box_size(100, 950, 1000).is_err());

        assert!(validate_64bit_box_size(15, 0, 1000).is_err());
        assert!(validate_64bit_box_size(16, 0, 1000).is_ok());
        assert!(validate_64bit_box_size(0, 0, 1000).is_ok());
        assert!(validate_64bit_box_size(u64::MAX, 10, u64::MAX).is_err());
    }

    #[test]
    fn timestamp_configuration() {
        assert!(validate_timestamp_configuration(0, 0, 100).is_err());
        assert!(validate_timestamp_configuration(0, 1000, 100).is_ok());
        assert!(validate_timestamp_configuration(44100, 44100, 441000).is_ok());
        assert!(validate_timestamp_configuration(101, 1000, 100).is_err());
        assert!(validate_timestamp_configuration(0, u32::MAX, 100).is_err());
    }

    fn info(sample_rate: u32, channel_count: u32, bits_per_sample: u32) -> TrackAudioInfo {
        TrackAudioInfo {
            sample_rate,
            channel_count,
            bits_per_sample,
        }
    }

    #[test]
    fn aac_config() {
        // AAC-LC, 44100 Hz, 2ch
        let asc = [0x12, 0x10];
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc, &info(44100, 2, 16)).is_ok());
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc, &info(48000, 2, 16)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc, &info(44100, 1, 16)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc[..1], &info(44100, 2, 16)).is_err());

        // object type 0 は予約
        let asc = [0x02, 0x10];
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc, &info(44100, 2, 16)).is_err());

        // HE-AAC (SBR) の場合はコア側のレートの 2 倍でもよい
        let asc = [0x2B, 0x8A];
        assert!(validate_codec_data_integrity(CodecKind::Aac, &asc, &info(44100, 1, 16)).is_ok());
    }

    fn alac_cookie(bit_depth: u8) -> Vec<u8> {
        let mut cookie = vec![0, 0, 0, 36];
        cookie.extend_from_slice(b"alac");
        cookie.extend_from_slice(&[0; 4]);
        cookie.extend_from_slice(&4096u32.to_be_bytes());
        cookie.push(0);
        cookie.push(bit_depth);
        cookie.extend_from_slice(&[40, 10, 14, 2, 0, 255, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xAC, 0x44]);
        cookie
    }

    #[test]
    fn alac_cookie_rules() {
        let cookie = alac_cookie(16);
        assert_eq!(cookie.len(), 36);
        assert!(validate_codec_data_integrity(CodecKind::Alac, &cookie, &info(44100, 2, 16)).is_ok());
        assert!(validate_codec_data_integrity(CodecKind::Alac, &cookie, &info(44100, 2, 24)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Alac, &cookie[..20], &info(44100, 2, 16)).is_err());

        let mut bad_tag = cookie.clone();
        bad_tag[4..8].copy_from_slice(b"xxxx");
        assert!(validate_codec_data_integrity(CodecKind::Alac, &bad_tag, &info(44100, 2, 16)).is_err());
    }

    #[test]
    fn telephony_and_pcm() {
        assert!(validate_codec_data_integrity(CodecKind::Ulaw, &[], &info(8000, 1, 8)).is_ok());
        assert!(validate_codec_data_integrity(CodecKind::Alaw, &[], &info(16000, 1, 8)).is_ok());
        assert!(validate_codec_data_integrity(CodecKind::Ulaw, &[], &info(44100, 1, 8)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Alaw, &[], &info(8000, 2, 8)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Ulaw, &[], &info(8000, 1, 16)).is_err());

        assert!(validate_codec_data_integrity(CodecKind::Lpcm, &[], &info(384000, 32, 24)).is_ok());
        assert!(validate_codec_data_integrity(CodecKind::Lpcm, &[], &info(8, 2, 16)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Lpcm, &[], &info(44100, 256, 16)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Lpcm, &[], &info(44100, 2, 12)).is_err());
        assert!(validate_codec_data_integrity(CodecKind::Lpcm, &[], &info(5_000_000, 2, 16)).is_err());

        assert!(validate_codec_data_integrity(CodecKind::Other, &[], &info(0, 0, 0)).is_ok());
    }

    #[test]
    fn container_compliance() {
        let payload = b"M4A \0\0\0\0isommp42";
        assert!(validate_container_compliance(payload, ContainerFamily::M4a).is_ok());
        assert!(validate_container_compliance(payload, ContainerFamily::Mp4).is_ok());
        assert!(validate_container_compliance(payload, ContainerFamily::Mov).is_err());
        assert!(validate_container_compliance(b"qt  \0\0\0\0", ContainerFamily::Mov).is_ok());
        assert!(validate_container_compliance(b"isom", ContainerFamily::Mp4).is_err());
        assert!(validate_container_compliance(b"", ContainerFamily::Mp4).is_err());
        assert!(validate_container_compliance(b"abcd\0\0\0\0", ContainerFamily::ThreeGp).is_err());
    }
}
