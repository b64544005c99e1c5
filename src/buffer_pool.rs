//! チャンクのペイロード用のバッファを再利用するためのプール
//!
//! プロセス全体で共有されるグローバルなインスタンスは用意せず、
//! 利用者が [`Arc<BufferPool>`] を作って Demuxer に渡す形を取る
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

/// プールに格納するバケットの最小サイズ
const MIN_BUCKET_SIZE: usize = 256;

/// [`BufferPool`] の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// サイズ（バケット）ごとに保持するバッファの上限数
    pub max_buffers_per_size: usize,

    /// プール全体で保持するバッファの上限数
    pub max_total_buffers: usize,

    /// プールの対象となるバッファサイズの上限
    ///
    /// これより大きいバッファはプールを経由せずに直接確保・解放される
    pub max_buffer_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_buffers_per_size: 8,
            max_total_buffers: 32,
            max_buffer_size: 1024 * 1024,
        }
    }
}

/// メモリ逼迫度合い
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryPressure {
    /// 通常
    #[default]
    Normal,

    /// 逼迫気味（プールする量を半分にする）
    High,

    /// 深刻（プールを空にして新たに溜めない）
    Critical,
}

/// [`BufferPool::stats()`] の返り値
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// プール内に保持されているバッファの数
    pub total_buffers: usize,

    /// プール内に保持されているバッファの合計容量（バイト）
    pub total_memory_bytes: usize,

    /// プール内で一番大きいバッファの容量
    pub largest_buffer_size: usize,

    /// プールから再利用できた回数
    pub pool_hits: u64,

    /// プールに適切なバッファがなく新規に確保した回数
    pub pool_misses: u64,

    /// サイズ上限を超えていたためプールを経由しなかった回数
    pub bypassed: u64,
}

type PressureCallback = dyn Fn(MemoryPressure) + Send + Sync;

#[derive(Debug, Default)]
struct PoolState {
    buckets: BTreeMap<usize, Vec<Vec<u8>>>,
    total_buffers: usize,
    pressure: MemoryPressure,
    max_buffers_per_size: usize,
}

impl PoolState {
    fn effective_max_per_size(&self) -> usize {
        match self.pressure {
            MemoryPressure::Normal => self.max_buffers_per_size,
            MemoryPressure::High => self.max_buffers_per_size / 2,
            MemoryPressure::Critical => 0,
        }
    }

    fn trim(&mut self) {
        let limit = self.effective_max_per_size();
        let mut removed = 0;
        for buffers in self.buckets.values_mut() {
            if buffers.len() > limit {
                removed += buffers.len() - limit;
                buffers.truncate(limit);
            }
        }
        self.buckets.retain(|_, v| !v.is_empty());
        self.total_buffers -= removed;
    }
}

/// スレッドセーフなバッファプール
pub struct BufferPool {
    config: BufferPoolConfig,
    state: Mutex<PoolState>,
    callbacks: Mutex<Vec<Arc<PressureCallback>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
}

impl BufferPool {
    /// 設定を指定してプールを生成する
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                max_buffers_per_size: config.max_buffers_per_size,
                ..PoolState::default()
            }),
            callbacks: Mutex::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
        }
    }

    /// 少なくとも `size` バイトの容量を持つ空のバッファを取得する
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        if size > self.config.max_buffer_size {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity(size);
        }

        let bucket = bucket_for_request(size);
        {
            let mut state = self.state.lock();
            let found = state
                .buckets
                .range_mut(bucket..)
                .find_map(|(_, buffers)| buffers.pop());
            if let Some(buf) = found {
                state.total_buffers -= 1;
                state.buckets.retain(|_, v| !v.is_empty());
                self.hits.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(bucket)
    }

    /// 使い終わったバッファをプールに返却する
    ///
    /// サイズ上限を超えるものや、プールが満杯の場合にはそのまま破棄される
    pub fn release(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity < MIN_BUCKET_SIZE || capacity > self.config.max_buffer_size {
            return;
        }

        let bucket = bucket_for_capacity(capacity);
        let mut state = self.state.lock();
        let limit = state.effective_max_per_size();
        if state.total_buffers >= self.config.max_total_buffers {
            return;
        }
        if state.buckets.get(&bucket).map_or(0, Vec::len) >= limit {
            return;
        }
        buf.clear();
        state.buckets.entry(bucket).or_default().push(buf);
        state.total_buffers += 1;
    }

    /// 統計情報を取得する
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut stats = BufferPoolStats {
            total_buffers: state.total_buffers,
            pool_hits: self.hits.load(Ordering::Relaxed),
            pool_misses: self.misses.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            ..BufferPoolStats::default()
        };
        for buf in state.buckets.values().flatten() {
            stats.total_memory_bytes += buf.capacity();
            stats.largest_buffer_size = stats.largest_buffer_size.max(buf.capacity());
        }
        stats
    }

    /// プール内のバッファを全て破棄して統計をリセットする
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.buckets.clear();
        state.total_buffers = 0;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.bypassed.store(0, Ordering::Relaxed);
    }

    /// サイズごとに保持するバッファの上限数を変更する
    pub fn set_max_buffers_per_size(&self, n: usize) {
        let mut state = self.state.lock();
        state.max_buffers_per_size = n;
        state.trim();
    }

    /// 現在のメモリ逼迫度合いを返す
    pub fn memory_pressure(&self) -> MemoryPressure {
        self.state.lock().pressure
    }

    /// メモリ逼迫度合いを更新する
    ///
    /// 登録済みのコールバックはプールのロックを解放した後に呼び出されるので、
    /// コールバックの中からこのプールを操作してもデッドロックしない
    pub fn set_memory_pressure(&self, pressure: MemoryPressure) {
        {
            let mut state = self.state.lock();
            if state.pressure == pressure {
                return;
            }
            state.pressure = pressure;
            state.trim();
        }
        log::debug!("Buffer pool memory pressure changed: {pressure:?}");

        let callbacks = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(pressure);
        }
    }

    /// メモリ逼迫度合いが変化した際に呼び出されるコールバックを登録する
    pub fn register_pressure_callback<F>(&self, f: F)
    where
        F: Fn(MemoryPressure) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(f));
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn bucket_for_request(size: usize) -> usize {
    size.max(MIN_BUCKET_SIZE).next_power_of_two()
}

fn bucket_for_capacity(capacity: usize) -> usize {
    // capacity 以下で最大の 2 の冪
    1 << (usize::BITS - 1 - capacity.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_is_reused() {
        let pool = BufferPool::default();
        let buf = pool.acquire(1000);
        assert!(buf.capacity() >= 1000);
        pool.release(buf);
        assert_eq!(pool.stats().total_buffers, 1);

        let buf = pool.acquire(600);
        assert!(buf.capacity() >= 600);
        assert!(buf.is_empty());
        let stats = pool.stats();
        assert_eq!(stats.pool_hits, 1);
        assert_eq!(stats.pool_misses, 1);
        assert_eq!(stats.total_buffers, 0);
    }

    #[test]
    fn oversized_buffer_bypasses_pool() {
        let pool = BufferPool::default();
        let buf = pool.acquire(4 * 1024 * 1024);
        pool.release(buf);
        let stats = pool.stats();
        assert_eq!(stats.total_buffers, 0);
        assert_eq!(stats.bypassed, 1);
    }

    #[test]
    fn per_size_limit_is_enforced() {
        let pool = BufferPool::default();
        pool.set_max_buffers_per_size(2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(4096));
        }
        assert_eq!(pool.stats().total_buffers, 2);
    }

    #[test]
    fn critical_pressure_drains_pool_and_runs_callbacks() {
        let pool = Arc::new(BufferPool::default());
        pool.release(Vec::with_capacity(4096));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            let pool2 = pool.clone();
            pool.register_pressure_callback(move |p| {
                // ロック外で呼ばれるのでプールを操作できる
                let _ = pool2.stats();
                seen.lock().push(p);
            });
        }
        pool.set_memory_pressure(MemoryPressure::Critical);
        assert_eq!(pool.stats().total_buffers, 0);
        assert_eq!(*seen.lock(), vec![MemoryPressure::Critical]);

        pool.release(Vec::with_capacity(4096));
        assert_eq!(pool.stats().total_buffers, 0);
    }
}
