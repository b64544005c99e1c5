//! Demuxer が読み込み対象とするバイトソースの抽象
use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read, Seek, SeekFrom},
    path::Path,
    sync::Arc,
};

/// シーク可能なバイトソース
///
/// Demuxer は入力データへのアクセスをすべてこのトレイト経由で行う。
/// 範囲外へのシークは位置を丸めずに失敗させること。
///
/// ひとつのインスタンスを複数スレッドから同時に使うことは想定していない。
/// 並行アクセスが必要な場合には呼び出し側で排他するか、インスタンスを分けること。
pub trait IoHandler: Send {
    /// 現在位置から最大 `buf.len()` バイトを読み込んで、実際に読み込んだバイト数を返す
    ///
    /// 終端に達していた場合には `Ok(0)` を返す
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// 読み込み位置を変更して、変更後の位置を返す
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64>;

    /// 現在の読み込み位置を返す
    fn tell(&self) -> u64;

    /// 直前の読み込みが終端に達していたかどうか
    fn eof(&self) -> bool;

    /// ソース全体のサイズを返す（わからない場合は [`None`]）
    fn file_size(&self) -> Option<u64>;

    /// ソースを閉じる
    ///
    /// 閉じた後の読み込みやシークはエラーとなる
    fn close(&mut self) -> std::io::Result<()>;

    /// `buf` が埋まるか終端に達するまで読み込みを繰り返す
    fn read_fully(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// 指定位置から最大 `len` バイトを読み込む
    ///
    /// 終端に達した場合には、返り値のサイズは `len` より小さくなる
    fn read_up_to_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; len];
        let n = self.read_fully(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// 指定位置からちょうど `len` バイトを読み込む
    ///
    /// 足りない場合には [`ErrorKind::UnexpectedEof`] エラーとなる
    fn read_exact_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let buf = self.read_up_to_at(offset, len)?;
        if buf.len() < len {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "expected {len} bytes at offset {offset}, but only {} bytes are available",
                    buf.len()
                ),
            ));
        }
        Ok(buf)
    }
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(ErrorKind::NotConnected, "I/O handler is already closed")
}

fn resolve_seek(pos: SeekFrom, current: u64, size: u64) -> std::io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(v) => Some(v),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => size.checked_add_signed(delta),
    };
    match target {
        Some(v) if v <= size => Ok(v),
        _ => Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("seek target out of range: {pos:?} (size={size})"),
        )),
    }
}

/// ソース全体のサイズを返す
///
/// [`IoHandler::file_size()`] がわからない場合は終端までシークして求める
pub(crate) fn source_size(io: &mut dyn IoHandler) -> std::io::Result<u64> {
    if let Some(size) = io.file_size() {
        return Ok(size);
    }
    let current = io.tell();
    let size = io.seek(SeekFrom::End(0))?;
    io.seek(SeekFrom::Start(current))?;
    Ok(size)
}

/// メモリ上のバイト列を読み込み対象とする [`IoHandler`] 実装
#[derive(Debug, Clone)]
pub struct MemoryIoHandler {
    data: Arc<[u8]>,
    position: u64,
    eof: bool,
    closed: bool,
}

impl MemoryIoHandler {
    /// バイト列を受け取ってインスタンスを生成する
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            eof: false,
            closed: false,
        }
    }

    /// 保持しているバイト列を返す
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl IoHandler for MemoryIoHandler {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        let start = (self.position as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        if n < buf.len() {
            self.eof = true;
        }
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        if self.closed {
            return Err(closed_error());
        }
        self.position = resolve_seek(pos, self.position, self.data.len() as u64)?;
        self.eof = false;
        Ok(self.position)
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn file_size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// ローカルファイルを読み込み対象とする [`IoHandler`] 実装
#[derive(Debug)]
pub struct FileIoHandler {
    reader: Option<BufReader<File>>,
    size: u64,
    position: u64,
    eof: bool,
}

impl FileIoHandler {
    /// 指定されたパスのファイルを開く
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        log::debug!(
            "Opened {} ({size} bytes)",
            path.as_ref().display()
        );
        Ok(Self {
            reader: Some(BufReader::with_capacity(64 * 1024, file)),
            size,
            position: 0,
            eof: false,
        })
    }
}

impl IoHandler for FileIoHandler {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.position += filled as u64;
        if filled < buf.len() {
            self.eof = true;
        }
        Ok(filled)
    }

    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let reader = self.reader.as_mut().ok_or_else(closed_error)?;
        let target = resolve_seek(pos, self.position, self.size)?;
        self.position = reader.seek(SeekFrom::Start(target))?;
        self.eof = false;
        Ok(self.position)
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn file_size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_handler_rejects_out_of_range_seek() {
        let mut io = MemoryIoHandler::new(vec![0u8; 16]);
        assert_eq!(io.seek(SeekFrom::Start(16)).unwrap(), 16);
        assert!(io.seek(SeekFrom::Start(17)).is_err());
        assert!(io.seek(SeekFrom::Current(-17)).is_err());
        assert_eq!(io.seek(SeekFrom::End(-4)).unwrap(), 12);
        // 失敗したシークは位置を変えない
        assert_eq!(io.tell(), 12);
    }

    #[test]
    fn memory_handler_sets_eof_on_short_read() {
        let mut io = MemoryIoHandler::new(vec![1u8, 2, 3]);
        let mut buf = [0u8; 2];
        assert_eq!(io.read(&mut buf).unwrap(), 2);
        assert!(!io.eof());
        assert_eq!(io.read(&mut buf).unwrap(), 1);
        assert!(io.eof());
        io.seek(SeekFrom::Start(0)).unwrap();
        assert!(!io.eof());
    }

    #[test]
    fn read_exact_at_reports_truncation() {
        let mut io = MemoryIoHandler::new(vec![0u8; 10]);
        assert_eq!(io.read_exact_at(4, 6).unwrap().len(), 6);
        let e = io.read_exact_at(8, 4).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnexpectedEof);
        assert_eq!(io.read_up_to_at(8, 4).unwrap().len(), 2);
    }

    #[test]
    fn closed_handler_fails() {
        let mut io = MemoryIoHandler::new(vec![0u8; 4]);
        io.close().unwrap();
        assert!(io.read(&mut [0u8; 1]).is_err());
        assert!(io.seek(SeekFrom::Start(0)).is_err());
    }
}
