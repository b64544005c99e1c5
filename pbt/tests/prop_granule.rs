//! グラニュール位置の演算の Property-Based Testing
use std::cmp::Ordering;

use proptest::prelude::*;
use shiguredo_demux::ogg::granule::{
    INVALID_GRANULE, granpos_add, granpos_cmp, granpos_diff, ms_to_samples, samples_to_ms,
};

/// 未設定以外の任意のグラニュール位置
fn arb_granule() -> impl Strategy<Value = i64> {
    any::<i64>().prop_filter("unset marker", |g| *g != INVALID_GRANULE)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// 未設定の値は他のどの値よりも小さい
    #[test]
    fn unset_sorts_first(g in arb_granule()) {
        prop_assert_eq!(granpos_cmp(INVALID_GRANULE, g), Ordering::Less);
        prop_assert_eq!(granpos_cmp(g, INVALID_GRANULE), Ordering::Greater);
        prop_assert_eq!(granpos_cmp(INVALID_GRANULE, INVALID_GRANULE), Ordering::Equal);
    }

    /// 比較は反対称で、非負の範囲では通常の整数比較と一致する
    #[test]
    fn cmp_is_antisymmetric(a in arb_granule(), b in arb_granule()) {
        prop_assert_eq!(granpos_cmp(a, b), granpos_cmp(b, a).reverse());
        prop_assert_eq!(granpos_cmp(a, a), Ordering::Equal);
        if a >= 0 && b >= 0 {
            prop_assert_eq!(granpos_cmp(a, b), a.cmp(&b));
        }
        if a >= 0 && b < 0 {
            prop_assert_eq!(granpos_cmp(a, b), Ordering::Less);
        }
    }

    /// 非負の値同士の差は常に計算でき、加算で元に戻る
    #[test]
    fn diff_then_add(a in 0..=i64::MAX / 2, delta in any::<i32>()) {
        let b = a + delta as i64;
        prop_assume!(b >= 0);

        prop_assert_eq!(granpos_add(a, delta).ok(), Some(b));
        prop_assert_eq!(granpos_diff(b, a).ok(), Some(delta as i64));
        prop_assert_eq!(granpos_cmp(b, a), delta.cmp(&0));
    }

    /// 未設定の値は演算に使えない
    #[test]
    fn unset_is_rejected(g in arb_granule(), delta in any::<i32>()) {
        prop_assert!(granpos_add(INVALID_GRANULE, delta).is_err());
        prop_assert!(granpos_diff(INVALID_GRANULE, g).is_err());
        prop_assert!(granpos_diff(g, INVALID_GRANULE).is_err());
    }

    /// 符号付きの上限を越える加算は、符号なしとして見て大きな値になる
    #[test]
    fn add_past_signed_max(src in (i64::MAX - 1000)..=i64::MAX, delta in 1001..=i32::MAX) {
        let result = granpos_add(src, delta);
        prop_assert!(result.is_ok());
        if let Ok(result) = result {
            prop_assert!(result < 0);
            prop_assert_eq!(granpos_cmp(result, src), Ordering::Greater);
        }
    }

    /// 負の範囲から非負の範囲へ一周する加算はエラーになる
    #[test]
    fn add_wrapping_past_unset(src in -1000i64..-1, delta in 1000..=i32::MAX) {
        prop_assert!(granpos_add(src, delta).is_err());
    }

    /// 1000 Hz 以上のサンプリングレートではミリ秒とサンプル数の往復で値が変わらない
    #[test]
    fn ms_survive_sample_conversion(ms in 0u64..1_000_000_000_000, rate in 1000u32..=384_000) {
        prop_assert_eq!(samples_to_ms(ms_to_samples(ms, rate), rate), ms);
    }

    /// サンプル数からミリ秒への変換は単調増加
    #[test]
    fn samples_to_ms_is_monotonic(a in any::<u64>(), b in any::<u64>(), rate in 1u32..=384_000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(samples_to_ms(lo, rate) <= samples_to_ms(hi, rate));
        prop_assert_eq!(samples_to_ms(a, 0), 0);
    }
}
