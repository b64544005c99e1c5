//! グラニュール位置の演算
//!
//! グラニュール位置は符号付き 64 ビット整数として格納されているが、
//! `-1` を「未設定」とし、それ以外は符号なし整数として順序づけられる
use std::cmp::Ordering;

use crate::{Error, Result};

/// グラニュール位置が未設定であることを示す値
pub const INVALID_GRANULE: i64 = -1;

/// グラニュール位置に差分を加える
///
/// `src` が未設定の場合や、結果が未設定を示す値になる場合、
/// 符号なしとして見た範囲を越えて一周してしまう場合にはエラーになる
pub fn granpos_add(src: i64, delta: i32) -> Result<i64> {
    if src == INVALID_GRANULE {
        return Err(Error::invalid_input("Cannot add to an unset granule position"));
    }
    let result = src.wrapping_add(delta as i64);
    if result == INVALID_GRANULE {
        return Err(Error::invalid_input("Granule addition produced the unset marker"));
    }
    if src < 0 && result >= 0 {
        return Err(Error::invalid_input(format!(
            "Granule addition overflowed: {src} + {delta}"
        )));
    }
    Ok(result)
}

/// `a - b` を計算する
///
/// どちらかが未設定の場合や、差が 64 ビットに収まらない場合にはエラーになる
pub fn granpos_diff(a: i64, b: i64) -> Result<i64> {
    if a == INVALID_GRANULE || b == INVALID_GRANULE {
        return Err(Error::invalid_input("Cannot diff an unset granule position"));
    }
    a.checked_sub(b)
        .ok_or_else(|| Error::invalid_input(format!("Granule difference overflowed: {a} - {b}")))
}

/// グラニュール位置を比較する
///
/// 未設定の値は他のどの値よりも小さく、負の値（符号なしとして見ると大きい値）は正の値よりも大きい
pub fn granpos_cmp(a: i64, b: i64) -> Ordering {
    match (a == INVALID_GRANULE, b == INVALID_GRANULE) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => (a as u64).cmp(&(b as u64)),
    }
}

/// サンプル数をミリ秒に変換する（四捨五入）
pub fn samples_to_ms(samples: u64, rate: u32) -> u64 {
    if rate == 0 {
        return 0;
    }
    let rate = rate as u128;
    ((samples as u128 * 1000 + rate / 2) / rate).min(u64::MAX as u128) as u64
}

/// ミリ秒をサンプル数に変換する（四捨五入）
pub fn ms_to_samples(ms: u64, rate: u32) -> u64 {
    ((ms as u128 * rate as u128 + 500) / 1000).min(u64::MAX as u128) as u64
}
