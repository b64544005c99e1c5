use std::num::NonZeroU32;

use crate::{
    Either,
    boxes::{StblBox, StszBox},
};

/// [`SampleTableAccessor`] の構築時に検出されたテーブル間の矛盾
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleTableAccessorError {
    /// stsc ボックスのエントリーが参照するチャンクが存在しない、あるいは昇順になっていない
    #[error("Invalid first_chunk in stsc entry #{entry_index}: {first_chunk} (chunk_count={chunk_count})")]
    InvalidFirstChunk {
        /// 問題のあったエントリーの位置（0 始まり）
        entry_index: usize,
        /// エントリーの first_chunk の値
        first_chunk: u32,
        /// stco / co64 ボックスに含まれるチャンクの数
        chunk_count: u32,
    },

    /// チャンクに割り当てられたサンプルの数が stsz ボックスのサンプル数に満たない
    #[error("Chunks cover only {covered} samples, but stsz declares {sample_count}")]
    MissingChunks {
        /// チャンク群でカバーされるサンプル数
        covered: u64,
        /// stsz ボックスのサンプル数
        sample_count: u32,
    },

    /// stts ボックスの尺情報がサンプル数に満たない
    #[error("stts covers only {covered} samples, but stsz declares {sample_count}")]
    MissingSampleTimes {
        /// stts ボックスでカバーされるサンプル数
        covered: u64,
        /// stsz ボックスのサンプル数
        sample_count: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct SttsRun {
    first_sample: u32,
    first_time: u64,
    sample_count: u32,
    sample_delta: u32,
}

#[derive(Debug, Clone, Copy)]
struct ChunkRun {
    offset: u64,
    first_sample: u32,
    sample_count: u32,
}

#[derive(Debug, Clone)]
enum SampleSizes {
    Fixed(u32),
    Variable(Vec<u32>),
}

/// [`StblBox`] の中の情報を簡単かつ効率的に取り出せるようにするための構造体
///
/// サンプル単位の配列は作らずにチャンク単位・stts エントリー単位の表だけを保持するので、
/// PCM のようにサンプル数が非常に多いトラックでもメモリ使用量は抑えられる
///
/// サンプル番号は MP4 の慣習に従って 1 始まり
#[derive(Debug, Clone)]
pub struct SampleTableAccessor {
    sample_count: u32,
    sizes: SampleSizes,
    stts_runs: Vec<SttsRun>,
    chunks: Vec<ChunkRun>,
    sync_samples: Option<Vec<u32>>,
    total_duration: u64,
}

impl SampleTableAccessor {
    /// 引数で渡された [`StblBox`] 用の [`SampleTableAccessor`] インスタンスを生成する
    pub fn new(stbl_box: &StblBox) -> Result<Self, SampleTableAccessorError> {
        let sample_count = stbl_box.stsz_box.sample_count();
        let sizes = match &stbl_box.stsz_box {
            StszBox::Fixed { sample_size, .. } => SampleSizes::Fixed(*sample_size),
            StszBox::Variable { entry_sizes } => SampleSizes::Variable(entry_sizes.clone()),
        };

        let mut stts_runs = Vec::new();
        let mut covered = 0u64;
        let mut time = 0u64;
        for entry in &stbl_box.stts_box.entries {
            if covered >= sample_count as u64 {
                break;
            }
            if entry.sample_count == 0 {
                continue;
            }
            stts_runs.push(SttsRun {
                first_sample: covered as u32,
                first_time: time,
                sample_count: entry.sample_count,
                sample_delta: entry.sample_delta,
            });
            covered += entry.sample_count as u64;
            time = time.saturating_add(entry.sample_count as u64 * entry.sample_delta as u64);
        }
        if covered < sample_count as u64 {
            return Err(SampleTableAccessorError::MissingSampleTimes {
                covered,
                sample_count,
            });
        }
        let total_duration = match stts_runs.last() {
            Some(last) => {
                let in_last = sample_count - last.first_sample;
                last.first_time + in_last.min(last.sample_count) as u64 * last.sample_delta as u64
            }
            None => 0,
        };

        let chunk_offsets = match &stbl_box.stco_or_co64_box {
            Either::A(b) => b.chunk_offsets.iter().map(|&v| v as u64).collect(),
            Either::B(b) => b.chunk_offsets.clone(),
        };
        let chunks = build_chunk_runs(stbl_box, &chunk_offsets, sample_count)?;

        let sync_samples = stbl_box.stss_box.as_ref().map(|b| {
            let mut v = b.sample_numbers.clone();
            v.sort_unstable();
            v
        });

        Ok(Self {
            sample_count,
            sizes,
            stts_runs,
            chunks,
            sync_samples,
            total_duration,
        })
    }

    /// トラック内のサンプルの数を取得する
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// サンプルを一つ以上含むチャンクの数を取得する
    pub fn chunk_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// トラック全体の尺（メディアのタイムスケール単位）
    pub fn total_duration(&self) -> u64 {
        self.total_duration
    }

    /// 全サンプルが同じサイズの場合にはそのサイズを返す
    pub fn fixed_sample_size(&self) -> Option<u32> {
        match self.sizes {
            SampleSizes::Fixed(size) => Some(size),
            SampleSizes::Variable(_) => None,
        }
    }

    /// 指定されたサンプルの尺を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_duration(&self, sample_index: NonZeroU32) -> Option<u32> {
        self.stts_run(sample_index).map(|run| run.sample_delta)
    }

    /// 指定されたサンプルのデコード時刻（メディアのタイムスケール単位）を取得する
    pub fn sample_decode_time(&self, sample_index: NonZeroU32) -> Option<u64> {
        let run = self.stts_run(sample_index)?;
        let i = (sample_index.get() - 1 - run.first_sample) as u64;
        Some(run.first_time + i * run.sample_delta as u64)
    }

    /// 指定されたサンプルのデータサイズ（バイト数）を取得する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn sample_size(&self, sample_index: NonZeroU32) -> Option<u32> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let i = sample_index.get() as usize - 1;
        match &self.sizes {
            SampleSizes::Fixed(size) => Some(*size),
            SampleSizes::Variable(sizes) => sizes.get(i).copied(),
        }
    }

    /// 指定されたサンプルが同期サンプルかどうかを判定する
    ///
    /// 存在しないサンプルが指定された場合には [`None`] が返される
    pub fn is_sync_sample(&self, sample_index: NonZeroU32) -> Option<bool> {
        if self.sample_count < sample_index.get() {
            return None;
        }

        let Some(sync_samples) = &self.sync_samples else {
            // stss ボックスが存在しない場合は全てが同期サンプル扱い
            return Some(true);
        };

        Some(sync_samples.binary_search(&sample_index.get()).is_ok())
    }

    /// 指定されたサンプルを含むチャンクの番号（1 始まり）と、チャンク内での位置（0 始まり）を返す
    pub fn sample_chunk(&self, sample_index: NonZeroU32) -> Option<(NonZeroU32, u32)> {
        if self.sample_count < sample_index.get() {
            return None;
        }
        let s = sample_index.get() - 1;
        let i = match self.chunks.binary_search_by_key(&s, |c| c.first_sample) {
            Ok(i) => i,
            Err(i) => i.checked_sub(1)?,
        };
        let chunk = self.chunks.get(i)?;
        let chunk_index = NonZeroU32::new(i as u32 + 1)?;
        Some((chunk_index, s - chunk.first_sample))
    }

    /// 指定されたチャンクのファイル内でのバイト位置を返す
    ///
    /// 存在しないチャンクが指定された場合には [`None`] が返される
    pub fn chunk_offset(&self, chunk_index: NonZeroU32) -> Option<u64> {
        self.chunks
            .get(chunk_index.get() as usize - 1)
            .map(|c| c.offset)
    }

    /// 指定されたチャンクに含まれるサンプル数を返す
    pub fn chunk_sample_count(&self, chunk_index: NonZeroU32) -> Option<u32> {
        self.chunks
            .get(chunk_index.get() as usize - 1)
            .map(|c| c.sample_count)
    }

    /// 指定されたサンプルのファイル内でのバイト位置を返す
    pub fn sample_offset(&self, sample_index: NonZeroU32) -> Option<u64> {
        let (chunk_index, index_in_chunk) = self.sample_chunk(sample_index)?;
        let chunk = self.chunks.get(chunk_index.get() as usize - 1)?;
        let preceding = match &self.sizes {
            SampleSizes::Fixed(size) => index_in_chunk as u64 * *size as u64,
            SampleSizes::Variable(sizes) => {
                let start = chunk.first_sample as usize;
                sizes
                    .get(start..start + index_in_chunk as usize)?
                    .iter()
                    .map(|&v| v as u64)
                    .sum()
            }
        };
        chunk.offset.checked_add(preceding)
    }

    /// 指定時刻（メディアのタイムスケール単位）以前に始まる最後のサンプルを返す
    ///
    /// サンプルが一つもない場合には [`None`] が返される
    pub fn find_sample_at_or_before(&self, time: u64) -> Option<NonZeroU32> {
        let i = match self.stts_runs.binary_search_by_key(&time, |r| r.first_time) {
            Ok(i) => i,
            Err(0) => return NonZeroU32::new(1).filter(|_| self.sample_count > 0),
            Err(i) => i - 1,
        };
        let run = self.stts_runs.get(i)?;
        let remaining = self.sample_count - run.first_sample;
        let in_run = run.sample_count.min(remaining);
        let offset_in_run = if run.sample_delta == 0 {
            0
        } else {
            ((time - run.first_time) / run.sample_delta as u64).min(in_run as u64 - 1) as u32
        };
        NonZeroU32::new(run.first_sample + offset_in_run + 1)
    }

    fn stts_run(&self, sample_index: NonZeroU32) -> Option<&SttsRun> {
        if self.sample_count < sample_index.get() {
            return None;
        }
        let s = sample_index.get() - 1;
        let i = match self.stts_runs.binary_search_by_key(&s, |r| r.first_sample) {
            Ok(i) => i,
            Err(i) => i.checked_sub(1)?,
        };
        self.stts_runs.get(i)
    }
}

fn build_chunk_runs(
    stbl_box: &StblBox,
    chunk_offsets: &[u64],
    sample_count: u32,
) -> Result<Vec<ChunkRun>, SampleTableAccessorError> {
    let chunk_count = chunk_offsets.len() as u32;
    let entries = &stbl_box.stsc_box.entries;
    let mut chunks = Vec::new();
    let mut next_sample = 0u64;

    for (i, entry) in entries.iter().enumerate() {
        let prev_first = i
            .checked_sub(1)
            .and_then(|j| entries.get(j))
            .map(|e| e.first_chunk)
            .unwrap_or(0);
        if entry.first_chunk == 0 || entry.first_chunk > chunk_count || entry.first_chunk <= prev_first
        {
            return Err(SampleTableAccessorError::InvalidFirstChunk {
                entry_index: i,
                first_chunk: entry.first_chunk,
                chunk_count,
            });
        }
        let last_chunk = entries
            .get(i + 1)
            .map(|e| e.first_chunk.saturating_sub(1))
            .unwrap_or(chunk_count)
            .min(chunk_count);

        for chunk_index in entry.first_chunk..=last_chunk {
            if next_sample >= sample_count as u64 {
                break;
            }
            let n = (entry.samples_per_chunk as u64).min(sample_count as u64 - next_sample);
            if n == 0 {
                continue;
            }
            chunks.push(ChunkRun {
                offset: chunk_offsets[chunk_index as usize - 1],
                first_sample: next_sample as u32,
                sample_count: n as u32,
            });
            next_sample += n;
        }
    }

    if next_sample < sample_count as u64 {
        return Err(SampleTableAccessorError::MissingChunks {
            covered: next_sample,
            sample_count,
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{
        StcoBox, StscBox, StscEntry, StsdBox, StssBox, SttsBox, SttsEntry,
    };

    fn stbl(sizes: StszBox, stsc: Vec<(u32, u32)>, offsets: Vec<u32>, stts: Vec<(u32, u32)>) -> StblBox {
        StblBox {
            stsd_box: StsdBox { entries: Vec::new() },
            stts_box: SttsBox {
                entries: stts
                    .into_iter()
                    .map(|(sample_count, sample_delta)| SttsEntry {
                        sample_count,
                        sample_delta,
                    })
                    .collect(),
            },
            stsc_box: StscBox {
                entries: stsc
                    .into_iter()
                    .map(|(first_chunk, samples_per_chunk)| StscEntry {
                        first_chunk,
                        samples_per_chunk,
                        sample_description_index: 1,
                    })
                    .collect(),
            },
            stsz_box: sizes,
            stco_or_co64_box: Either::A(StcoBox {
                chunk_offsets: offsets,
            }),
            stss_box: None,
            unknown_boxes: Vec::new(),
        }
    }

    fn idx(i: u32) -> NonZeroU32 {
        NonZeroU32::new(i).unwrap()
    }

    #[test]
    fn maps_samples_to_offsets_and_times() {
        // 5 サンプルを 2, 2, 1 個ずつ 3 チャンクに配置
        let table = stbl(
            StszBox::Variable {
                entry_sizes: vec![10, 20, 30, 40, 50],
            },
            vec![(1, 2), (3, 1)],
            vec![100, 200, 300],
            vec![(4, 1024), (1, 512)],
        );
        let a = SampleTableAccessor::new(&table).unwrap();
        assert_eq!(a.sample_count(), 5);
        assert_eq!(a.chunk_count(), 3);
        assert_eq!(a.sample_offset(idx(1)), Some(100));
        assert_eq!(a.sample_offset(idx(2)), Some(110));
        assert_eq!(a.sample_offset(idx(3)), Some(200));
        assert_eq!(a.sample_offset(idx(4)), Some(230));
        assert_eq!(a.sample_offset(idx(5)), Some(300));
        assert_eq!(a.sample_decode_time(idx(5)), Some(4096));
        assert_eq!(a.sample_duration(idx(5)), Some(512));
        assert_eq!(a.total_duration(), 4096 + 512);
        assert_eq!(a.sample_size(idx(6)), None);
    }

    #[test]
    fn finds_last_sample_at_or_before_time() {
        let table = stbl(
            StszBox::Fixed {
                sample_size: 4,
                sample_count: 10,
            },
            vec![(1, 5)],
            vec![0, 1000],
            vec![(10, 100)],
        );
        let a = SampleTableAccessor::new(&table).unwrap();
        assert_eq!(a.find_sample_at_or_before(0), Some(idx(1)));
        assert_eq!(a.find_sample_at_or_before(99), Some(idx(1)));
        assert_eq!(a.find_sample_at_or_before(100), Some(idx(2)));
        assert_eq!(a.find_sample_at_or_before(550), Some(idx(6)));
        assert_eq!(a.find_sample_at_or_before(1_000_000), Some(idx(10)));
        assert_eq!(a.sample_offset(idx(7)), Some(1004));
    }

    #[test]
    fn sync_samples_default_to_all() {
        let mut table = stbl(
            StszBox::Fixed {
                sample_size: 4,
                sample_count: 3,
            },
            vec![(1, 3)],
            vec![0],
            vec![(3, 1)],
        );
        let a = SampleTableAccessor::new(&table).unwrap();
        assert_eq!(a.is_sync_sample(idx(2)), Some(true));

        table.stss_box = Some(StssBox {
            sample_numbers: vec![1, 3],
        });
        let a = SampleTableAccessor::new(&table).unwrap();
        assert_eq!(a.is_sync_sample(idx(2)), Some(false));
        assert_eq!(a.is_sync_sample(idx(3)), Some(true));
    }

    #[test]
    fn rejects_inconsistent_tables() {
        let table = stbl(
            StszBox::Fixed {
                sample_size: 4,
                sample_count: 10,
            },
            vec![(1, 2)],
            vec![0, 100],
            vec![(10, 1)],
        );
        assert!(matches!(
            SampleTableAccessor::new(&table),
            Err(SampleTableAccessorError::MissingChunks { covered: 4, .. })
        ));

        let table = stbl(
            StszBox::Fixed {
                sample_size: 4,
                sample_count: 2,
            },
            vec![(3, 2)],
            vec![0],
            vec![(2, 1)],
        );
        assert!(matches!(
            SampleTableAccessor::new(&table),
            Err(SampleTableAccessorError::InvalidFirstChunk { .. })
        ));

        let table = stbl(
            StszBox::Fixed {
                sample_size: 4,
                sample_count: 2,
            },
            vec![(1, 2)],
            vec![0],
            vec![(1, 1)],
        );
        assert!(matches!(
            SampleTableAccessor::new(&table),
            Err(SampleTableAccessorError::MissingSampleTimes { .. })
        ));
    }
}
