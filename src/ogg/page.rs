//! Ogg ページの構造と、入力ソース上でのページ探索
use std::ops::Range;

use crate::{Decode, Encode, Error, ErrorKind, Le, Result, io::IoHandler};

/// 前方 / 後方探索で一度に読み込む単位
pub const CHUNK_SIZE: u64 = 65536;

/// Ogg ページ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    /// ヘッダー種別フラグ（継続 / BOS / EOS）
    pub header_type: u8,

    /// グラニュール位置（-1 はこのページで完結するパケットがないことを示す）
    pub granule_position: i64,

    /// 論理ストリームのシリアル番号
    pub serial_number: u32,

    /// ページシーケンス番号
    pub sequence_number: u32,

    /// セグメントテーブル
    pub segment_table: Vec<u8>,

    /// ページ本体
    pub body: Vec<u8>,
}

impl OggPage {
    /// キャプチャーパターン
    pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

    /// セグメントテーブルを除いたヘッダーのバイト数
    pub const MIN_HEADER_SIZE: usize = 27;

    /// ページの最大バイト数
    pub const MAX_SIZE: usize = Self::MIN_HEADER_SIZE + 255 + 255 * 255;

    /// 直前のページから続くパケットで始まることを示すフラグ
    pub const FLAG_CONTINUED: u8 = 0x01;

    /// 論理ストリームの最初のページであることを示すフラグ
    pub const FLAG_BOS: u8 = 0x02;

    /// 論理ストリームの最後のページであることを示すフラグ
    pub const FLAG_EOS: u8 = 0x04;

    /// ページ本体から新しいページを生成する
    ///
    /// セグメントテーブルは `packets` のレーシング値から計算される。
    /// `last_packet_complete` が `false` の場合、最後のパケットは次のページに継続する。
    /// その場合、最後のパケットは 255 バイト単位のセグメントに収まる部分だけが格納される。
    pub fn from_packets(
        serial_number: u32,
        sequence_number: u32,
        granule_position: i64,
        header_type: u8,
        packets: &[&[u8]],
        last_packet_complete: bool,
    ) -> Self {
        let mut segment_table = Vec::new();
        let mut body = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let complete = last_packet_complete || i + 1 < packets.len();
            let mut remaining = packet.len();
            while remaining >= 255 {
                segment_table.push(255);
                remaining -= 255;
            }
            if complete {
                segment_table.push(remaining as u8);
                body.extend_from_slice(packet);
            } else {
                body.extend_from_slice(&packet[..packet.len() - remaining]);
            }
        }
        Self {
            header_type,
            granule_position,
            serial_number,
            sequence_number,
            segment_table,
            body,
        }
    }

    /// 直前のページから続くパケットで始まるかどうか
    pub fn is_continued(&self) -> bool {
        self.header_type & Self::FLAG_CONTINUED != 0
    }

    /// 論理ストリームの最初のページかどうか
    pub fn is_bos(&self) -> bool {
        self.header_type & Self::FLAG_BOS != 0
    }

    /// 論理ストリームの最後のページかどうか
    pub fn is_eos(&self) -> bool {
        self.header_type & Self::FLAG_EOS != 0
    }

    /// 有効なグラニュール位置を持つかどうか
    pub fn has_granule(&self) -> bool {
        self.granule_position != -1
    }

    /// ヘッダー部分のバイト数
    pub fn header_size(&self) -> usize {
        Self::MIN_HEADER_SIZE + self.segment_table.len()
    }

    /// ページ全体のバイト数
    pub fn total_size(&self) -> usize {
        self.header_size() + self.body.len()
    }

    /// ページ本体を区切ったパケット断片を返す
    ///
    /// 各要素はページ本体内の範囲と、パケットがこのページで完結しているかどうかのペア。
    /// 完結していないのは最後の要素のみで、その続きは次のページに置かれている。
    pub fn packet_spans(&self) -> Vec<(Range<usize>, bool)> {
        let mut spans = Vec::new();
        let mut start = 0;
        let mut end = 0;
        for &lacing in &self.segment_table {
            end += lacing as usize;
            if lacing < 255 {
                spans.push((start..end, true));
                start = end;
            }
        }
        if start < end || self.segment_table.last() == Some(&255) {
            spans.push((start..end, false));
        }
        spans
    }

    /// このページで完結するパケットの数
    pub fn completed_packets(&self) -> usize {
        self.segment_table.iter().filter(|&&l| l < 255).count()
    }
}

impl Decode for OggPage {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        Error::check_buffer_size(Self::MIN_HEADER_SIZE, buf)?;
        if buf[..4] != Self::CAPTURE_PATTERN {
            return Err(Error::invalid_data("Missing Ogg capture pattern"));
        }
        if buf[4] != 0 {
            return Err(Error::invalid_data(format!(
                "Unsupported Ogg stream structure version: {}",
                buf[4]
            )));
        }
        let header_type = buf[5];
        if header_type & !0x07 != 0 {
            return Err(Error::invalid_data(format!(
                "Invalid Ogg header type flags: {header_type:#04x}"
            )));
        }

        let mut offset = 6;
        let granule_position = Le::<i64>::decode_at(buf, &mut offset)?.get();
        let serial_number = Le::<u32>::decode_at(buf, &mut offset)?.get();
        let sequence_number = Le::<u32>::decode_at(buf, &mut offset)?.get();
        let checksum = Le::<u32>::decode_at(buf, &mut offset)?.get();
        let segments = u8::decode_at(buf, &mut offset)? as usize;

        let header_size = Self::MIN_HEADER_SIZE + segments;
        Error::check_buffer_size(header_size, buf)?;
        let segment_table = buf[offset..header_size].to_vec();
        let body_size: usize = segment_table.iter().map(|&l| l as usize).sum();
        let total_size = header_size + body_size;
        Error::check_buffer_size(total_size, buf)?;

        let actual = page_crc(&buf[..total_size]);
        if actual != checksum {
            return Err(Error::invalid_data(format!(
                "Ogg page CRC mismatch: expected {checksum:#010x}, computed {actual:#010x}"
            )));
        }

        let this = Self {
            header_type,
            granule_position,
            serial_number,
            sequence_number,
            segment_table,
            body: buf[header_size..total_size].to_vec(),
        };
        Ok((this, total_size))
    }
}

impl Encode for OggPage {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let total_size = self.total_size();
        Error::check_buffer_size(total_size, buf)?;
        if self.segment_table.len() > 255 {
            return Err(Error::invalid_input("Too many Ogg page segments"));
        }

        let mut offset = 0;
        offset += Self::CAPTURE_PATTERN.encode(&mut buf[offset..])?;
        offset += 0u8.encode(&mut buf[offset..])?;
        offset += self.header_type.encode(&mut buf[offset..])?;
        offset += self.granule_position.to_le_bytes().encode(&mut buf[offset..])?;
        offset += Le(self.serial_number).encode(&mut buf[offset..])?;
        offset += Le(self.sequence_number).encode(&mut buf[offset..])?;
        let crc_offset = offset;
        offset += Le(0u32).encode(&mut buf[offset..])?;
        offset += (self.segment_table.len() as u8).encode(&mut buf[offset..])?;
        offset += self.segment_table.encode(&mut buf[offset..])?;
        offset += self.body.encode(&mut buf[offset..])?;

        let crc = crc32(&buf[..offset]);
        buf[crc_offset..crc_offset + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(offset)
    }
}

const CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
};

/// Ogg で使われる CRC-32（多項式 0x04c11db7、初期値 0、反転なし）
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0, data)
}

fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &b| {
        (crc << 8) ^ CRC_TABLE[((crc >> 24) as u8 ^ b) as usize]
    })
}

/// CRC フィールドを 0 とみなしてページの CRC を計算する
fn page_crc(page: &[u8]) -> u32 {
    let crc = crc32_update(0, &page[..22]);
    let crc = crc32_update(crc, &[0; 4]);
    crc32_update(crc, &page[26..])
}

/// 指定位置から始まるページを読み込む
///
/// そこに正しいページがない場合（壊れている場合や終端に達した場合）には [`None`] を返す
pub fn read_page_at(io: &mut dyn IoHandler, offset: u64) -> Result<Option<OggPage>> {
    let header = io.read_up_to_at(offset, OggPage::MIN_HEADER_SIZE)?;
    if header.len() < OggPage::MIN_HEADER_SIZE || header[..4] != OggPage::CAPTURE_PATTERN {
        return Ok(None);
    }
    let segments = header[26] as usize;
    let table = io.read_up_to_at(offset + OggPage::MIN_HEADER_SIZE as u64, segments)?;
    if table.len() < segments {
        return Ok(None);
    }
    let body_size: usize = table.iter().map(|&l| l as usize).sum();
    let page = io.read_up_to_at(offset, OggPage::MIN_HEADER_SIZE + segments + body_size)?;
    match OggPage::decode(&page) {
        Ok((page, _)) => Ok(Some(page)),
        Err(e) if matches!(e.kind, ErrorKind::InvalidData | ErrorKind::InsufficientBuffer) => {
            log::trace!("No valid Ogg page at offset {offset}: {}", e.reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// `offset` 以降で最初に見つかる正しいページを探す
///
/// `boundary` が指定された場合、その位置より前から始まるページのみを対象にする。
/// 見つかった場合にはページの開始位置とページを返す。
pub fn next_page(
    io: &mut dyn IoHandler,
    offset: u64,
    boundary: Option<u64>,
) -> Result<Option<(u64, OggPage)>> {
    let mut pos = offset;
    loop {
        if boundary.is_some_and(|b| pos >= b) {
            return Ok(None);
        }
        let window = io.read_up_to_at(pos, CHUNK_SIZE as usize + OggPage::MAX_SIZE)?;
        if window.len() < OggPage::MIN_HEADER_SIZE {
            return Ok(None);
        }
        let is_last_window = window.len() < CHUNK_SIZE as usize + OggPage::MAX_SIZE;
        let scan_len = if is_last_window {
            window.len()
        } else {
            CHUNK_SIZE as usize
        };

        // 窓の境界をまたぐキャプチャーパターンも拾えるように 3 バイト余分に探す
        let search_end = (scan_len + 3).min(window.len());
        let mut i = 0;
        while let Some(found) = find_capture_pattern(&window[i..search_end]) {
            let start = i + found;
            if start >= scan_len {
                break;
            }
            let page_offset = pos + start as u64;
            if boundary.is_some_and(|b| page_offset >= b) {
                return Ok(None);
            }
            match OggPage::decode(&window[start..]) {
                Ok((page, _)) => return Ok(Some((page_offset, page))),
                Err(e) => {
                    log::trace!("Skipping invalid Ogg page at {page_offset}: {}", e.reason);
                    i = start + 1;
                }
            }
        }

        if is_last_window {
            return Ok(None);
        }
        pos += CHUNK_SIZE;
    }
}

/// `end` 以前で終わる最後のページを探す
///
/// `serial` が指定された場合、そのシリアル番号を持つページのみを対象とする。
/// `floor` より前から始まるページは対象外。
pub fn prev_page(
    io: &mut dyn IoHandler,
    end: u64,
    serial: Option<u32>,
    floor: u64,
) -> Result<Option<(u64, OggPage)>> {
    let mut window_end = end;
    while window_end > floor {
        let begin = window_end.saturating_sub(CHUNK_SIZE).max(floor);
        let mut best = None;
        let mut pos = begin;
        while let Some((page_offset, page)) = next_page(io, pos, Some(window_end))? {
            let page_end = page_offset + page.total_size() as u64;
            if page_end > end {
                break;
            }
            pos = page_end;
            if serial.is_none_or(|s| s == page.serial_number) {
                best = Some((page_offset, page));
            }
        }
        if best.is_some() {
            return Ok(best);
        }
        window_end = begin;
    }
    Ok(None)
}

fn find_capture_pattern(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == OggPage::CAPTURE_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryIoHandler;

    fn page(serial: u32, seq: u32, granule: i64, payload: &[u8]) -> Vec<u8> {
        OggPage::from_packets(serial, seq, granule, 0, &[payload], true)
            .encode_to_vec()
            .unwrap()
    }

    #[test]
    fn crc_of_known_vector() {
        assert_eq!(crc32(b""), 0);
        assert_eq!(crc32(b"123456789"), 0x89A1_897F);
    }

    #[test]
    fn encode_then_decode_page() {
        let bytes = page(7, 2, 1234, b"hello");
        let (decoded, size) = OggPage::decode(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(decoded.serial_number, 7);
        assert_eq!(decoded.granule_position, 1234);
        assert_eq!(decoded.body, b"hello");
        assert_eq!(decoded.packet_spans(), vec![(0..5, true)]);
    }

    #[test]
    fn corrupted_page_fails_crc() {
        let mut bytes = page(7, 2, 1234, b"hello");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let e = OggPage::decode(&bytes).unwrap_err();
        assert_eq!(e.kind, ErrorKind::InvalidData);

        let e = OggPage::decode(&bytes[..20]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::InsufficientBuffer);
    }

    #[test]
    fn packet_spans_with_continuation() {
        let big = vec![1u8; 600];
        let p = OggPage::from_packets(1, 0, -1, 0, &[b"ab".as_slice(), big.as_slice()], false);
        assert_eq!(p.segment_table, vec![2, 255, 255]);
        assert_eq!(p.completed_packets(), 1);
        assert_eq!(p.body.len(), 512);
        assert_eq!(p.packet_spans(), vec![(0..2, true), (2..512, false)]);

        // 255 バイトちょうどのパケットは長さ 0 のセグメントで終端される
        let exact = vec![1u8; 255];
        let p = OggPage::from_packets(1, 0, 0, 0, &[exact.as_slice()], true);
        assert_eq!(p.segment_table, vec![255, 0]);
        assert_eq!(p.packet_spans(), vec![(0..255, true)]);
    }

    #[test]
    fn scan_forward_and_backward() {
        let mut data = b"garbageOggSnope".to_vec();
        let first = data.len() as u64;
        data.extend(page(1, 0, 100, b"a"));
        let second = data.len() as u64;
        data.extend(page(2, 0, 200, b"b"));
        let third = data.len() as u64;
        data.extend(page(1, 1, 300, b"c"));
        let end = data.len() as u64;
        let mut io = MemoryIoHandler::new(data);

        let (offset, p) = next_page(&mut io, 0, None).unwrap().unwrap();
        assert_eq!((offset, p.granule_position), (first, 100));
        let (offset, _) = next_page(&mut io, first + 1, None).unwrap().unwrap();
        assert_eq!(offset, second);
        assert!(next_page(&mut io, first + 1, Some(second)).unwrap().is_none());

        let (offset, p) = prev_page(&mut io, end, None, 0).unwrap().unwrap();
        assert_eq!((offset, p.granule_position), (third, 300));
        let (offset, p) = prev_page(&mut io, end, Some(2), 0).unwrap().unwrap();
        assert_eq!((offset, p.serial_number), (second, 2));
        let (offset, _) = prev_page(&mut io, third, Some(1), 0).unwrap().unwrap();
        assert_eq!(offset, first);
        assert!(prev_page(&mut io, third, Some(1), second).unwrap().is_none());

        assert_eq!(read_page_at(&mut io, second).unwrap().unwrap().serial_number, 2);
        assert!(read_page_at(&mut io, second + 1).unwrap().is_none());
    }
}
