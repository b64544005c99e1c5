//! BufferPool の Property-Based Testing
//!
//! ランダムな操作列を適用しても統計情報の不変条件が崩れないことを確認する
use proptest::prelude::*;
use shiguredo_demux::buffer_pool::{BufferPool, BufferPoolConfig, MemoryPressure};

const CONFIG: BufferPoolConfig = BufferPoolConfig {
    max_buffers_per_size: 3,
    max_total_buffers: 6,
    max_buffer_size: 8192,
};

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Release(usize),
    AcquireAndRelease(usize),
    Pressure(MemoryPressure),
    SetMaxPerSize(usize),
    Clear,
}

fn arb_pressure() -> impl Strategy<Value = MemoryPressure> {
    prop_oneof![
        Just(MemoryPressure::Normal),
        Just(MemoryPressure::High),
        Just(MemoryPressure::Critical),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..12_000).prop_map(Op::Acquire),
        4 => (0usize..12_000).prop_map(Op::Release),
        3 => (0usize..12_000).prop_map(Op::AcquireAndRelease),
        1 => arb_pressure().prop_map(Op::Pressure),
        1 => (0usize..5).prop_map(Op::SetMaxPerSize),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// 操作列の適用中、統計情報が常に設定の範囲内に収まる
    #[test]
    fn stats_stay_within_limits(ops in prop::collection::vec(arb_op(), 1..60)) {
        let pool = BufferPool::new(CONFIG);
        let mut acquires = 0u64;

        for op in ops {
            match op {
                Op::Acquire(size) => {
                    let buf = pool.acquire(size);
                    prop_assert!(buf.is_empty());
                    prop_assert!(buf.capacity() >= size);
                    acquires += 1;
                }
                Op::Release(capacity) => pool.release(Vec::with_capacity(capacity)),
                Op::AcquireAndRelease(size) => {
                    let mut buf = pool.acquire(size);
                    buf.resize(size, 0xAA);
                    pool.release(buf);
                    acquires += 1;
                }
                Op::Pressure(pressure) => {
                    pool.set_memory_pressure(pressure);
                    prop_assert_eq!(pool.memory_pressure(), pressure);
                }
                Op::SetMaxPerSize(n) => pool.set_max_buffers_per_size(n),
                Op::Clear => {
                    pool.clear();
                    acquires = 0;
                }
            }

            let stats = pool.stats();
            prop_assert!(stats.total_buffers <= CONFIG.max_total_buffers);
            prop_assert!(stats.largest_buffer_size <= CONFIG.max_buffer_size);
            prop_assert!(stats.total_memory_bytes >= stats.total_buffers * 256);
            prop_assert!(
                stats.total_memory_bytes <= stats.total_buffers * stats.largest_buffer_size
            );
            prop_assert_eq!(stats.pool_hits + stats.pool_misses + stats.bypassed, acquires);
            if pool.memory_pressure() == MemoryPressure::Critical {
                prop_assert_eq!(stats.total_buffers, 0);
            }
        }
    }

    /// プールから取り出したバッファは以前の内容を残さない
    #[test]
    fn reused_buffers_are_cleared(sizes in prop::collection::vec(256usize..4096, 1..20)) {
        let pool = BufferPool::new(CONFIG);
        for size in sizes {
            let mut buf = pool.acquire(size);
            prop_assert!(buf.is_empty());
            buf.extend(std::iter::repeat_n(0xFF, size));
            pool.release(buf);
        }
        let stats = pool.stats();
        prop_assert!(stats.pool_hits + stats.pool_misses > 0);
        prop_assert_eq!(stats.bypassed, 0);
    }

    /// 上限を超えるサイズの要求はプールを経由しない
    #[test]
    fn oversized_requests_bypass_the_pool(size in 8193usize..100_000) {
        let pool = BufferPool::new(CONFIG);
        let buf = pool.acquire(size);
        prop_assert!(buf.capacity() >= size);
        pool.release(buf);

        let stats = pool.stats();
        prop_assert_eq!(stats.bypassed, 1);
        prop_assert_eq!(stats.total_buffers, 0);
        prop_assert_eq!(stats.pool_misses, 0);
    }
}
