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

//! Golomb + length-limited-unary entropy coding for the CPC pair stream and
//! window-byte stream, and the four flavor-specific compress/uncompress
//! paths built on top of them.
//!
//! The two streams are sequences of little-endian 32-bit words, built by
//! accumulating bits into a 64-bit buffer and spilling 32 bits whenever it
//! fills.
//!
//! Pinned surprise pairs always lie at or past column 8 (the window occupies
//! the 8 columns below), so their column is shifted down by 8 before
//! Golomb-coding and back up by 8 after. Sliding's surprise columns are
//! first rotated relative to the window offset and then run through a
//! per-phase permutation (see `compression_tables`) for entropy tuning;
//! cross-language bit-exact compression is explicitly out of scope, so the
//! permutation tables are derived rather than transcribed from a reference
//! implementation, but the transform shapes themselves are applied as
//! described.

use crate::cpc::compression_tables::{
    determine_pseudo_phase, COLUMN_PERMUTATION_TABLES, PAIR_DELTA_TABLES, WINDOW_BYTE_TABLES,
};
use crate::cpc::pair_table::merge_pairs;

/// Output of compressing one sketch: the pair-stream (`csv`) and
/// window-byte-stream (`cw`) words.
pub(super) struct CompressedStreams {
    pub csv: Vec<u32>,
    pub cw: Vec<u32>,
}

struct BitWriter {
    words: Vec<u32>,
    bitbuf: u64,
    bufbits: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            words: Vec::new(),
            bitbuf: 0,
            bufbits: 0,
        }
    }

    fn put_bits(&mut self, value: u32, len: u8) {
        if len == 0 {
            return;
        }
        self.bitbuf |= (value as u64) << self.bufbits;
        self.bufbits += len;
        self.maybe_flush();
    }

    fn write_unary(&mut self, value: u64) {
        let mut remaining = value;
        while remaining >= 16 {
            remaining -= 16;
            self.bufbits += 16;
            self.maybe_flush();
        }
        let code = 1u64 << remaining;
        self.bitbuf |= code << self.bufbits;
        self.bufbits += (remaining + 1) as u8;
        self.maybe_flush();
    }

    fn maybe_flush(&mut self) {
        while self.bufbits >= 32 {
            self.words.push((self.bitbuf & 0xffff_ffff) as u32);
            self.bitbuf >>= 32;
            self.bufbits -= 32;
        }
    }

    /// Reserves `n` zero bits without writing them (the buffer already
    /// holds zeros past `bufbits`).
    fn pad(&mut self, n: u8) {
        self.bufbits += n;
        self.maybe_flush();
    }

    fn finish(mut self) -> Vec<u32> {
        if self.bufbits > 0 {
            self.words.push((self.bitbuf & 0xffff_ffff) as u32);
        }
        self.words
    }
}

struct BitReader<'a> {
    words: &'a [u32],
    word_index: usize,
    bitbuf: u64,
    bufbits: u8,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            word_index: 0,
            bitbuf: 0,
            bufbits: 0,
        }
    }

    fn ensure(&mut self, n: u8) {
        while self.bufbits < n && self.word_index < self.words.len() {
            self.bitbuf |= (self.words[self.word_index] as u64) << self.bufbits;
            self.bufbits += 32;
            self.word_index += 1;
        }
    }

    fn peek(&mut self, n: u8) -> u32 {
        self.ensure(n);
        if n == 0 {
            0
        } else {
            (self.bitbuf & ((1u64 << n) - 1)) as u32
        }
    }

    fn consume(&mut self, n: u8) {
        self.bitbuf >>= n;
        self.bufbits = self.bufbits.saturating_sub(n);
    }

    fn read_unary(&mut self) -> u64 {
        let mut total = 0u64;
        loop {
            let chunk = self.peek(8) as u8;
            if chunk == 0 {
                self.consume(8);
                total += 8;
            } else {
                let tz = chunk.trailing_zeros() as u64;
                self.consume((tz + 1) as u8);
                total += tz;
                return total;
            }
        }
    }
}

/// Returns an integer in `[0, ceil(log2(k)))`: the number of low bits the
/// Golomb code for `yDelta` keeps uncompressed.
fn golomb_choose_number_of_base_bits(k: u64, count: u64) -> u8 {
    debug_assert!(k > 0);
    debug_assert!(count > 0);
    let quotient = (k - count) / count;
    if quotient == 0 {
        0
    } else {
        floor_log2_of_long(quotient)
    }
}

fn floor_log2_of_long(x: u64) -> u8 {
    debug_assert!(x > 0);
    63 - x.leading_zeros() as u8
}

pub(super) fn safe_length_for_compressed_pair_buf(k: u64, num_pairs: u64, num_base_bits: u8) -> usize {
    let ybits = (num_pairs * (1 + num_base_bits as u64)) + (k >> num_base_bits);
    let xbits = 12 * num_pairs;
    let padding = 10u64.saturating_sub(num_base_bits as u64);
    divide_rounding_up(xbits + ybits + padding, 32) as usize
}

pub(super) fn safe_length_for_compressed_window_buf(k: u64) -> usize {
    divide_rounding_up(12 * k + 11, 32) as usize
}

fn divide_rounding_up(x: u64, y: u64) -> u64 {
    (x + y - 1) / y
}

fn low_level_compress_pairs(pairs: &[u32], num_base_bits: u8) -> Vec<u32> {
    let mut bw = BitWriter::new();
    let golomb_lo_mask = (1u64 << num_base_bits) - 1;
    let mut predicted_row = 0u32;
    let mut predicted_col = 0u32;
    let enc = &PAIR_DELTA_TABLES.0;

    for &pair in pairs {
        let row = pair >> 6;
        let col = pair & 63;
        if row != predicted_row {
            predicted_col = 0;
        }
        let y_delta = row - predicted_row;
        let x_delta = col - predicted_col;
        predicted_row = row;
        predicted_col = col + 1;

        let code_info = enc[x_delta as usize];
        bw.put_bits(code_info & 0xfff, (code_info >> 12) as u8);

        let golomb_lo = (y_delta as u64) & golomb_lo_mask;
        let golomb_hi = (y_delta as u64) >> num_base_bits;
        bw.write_unary(golomb_hi);
        bw.put_bits(golomb_lo as u32, num_base_bits);
    }

    let padding = 10u8.saturating_sub(num_base_bits);
    bw.pad(padding);
    bw.finish()
}

fn low_level_uncompress_pairs(words: &[u32], num_pairs: u32, num_base_bits: u8) -> Vec<u32> {
    let mut br = BitReader::new(words);
    let dec = &PAIR_DELTA_TABLES.1;
    let mut prev_row = 0u32;
    let mut prev_col = 0u32;
    let mut pairs = Vec::with_capacity(num_pairs as usize);

    for _ in 0..num_pairs {
        let peek = br.peek(12);
        let entry = dec[peek as usize];
        let code_len = (entry >> 8) as u8;
        let x_delta = (entry & 0xff) as u32;
        br.consume(code_len);

        let golomb_hi = br.read_unary();
        let golomb_lo = br.peek(num_base_bits) as u64;
        br.consume(num_base_bits);
        let y_delta = ((golomb_hi << num_base_bits) | golomb_lo) as u32;

        let row = prev_row + y_delta;
        let col_base = if row != prev_row { 0 } else { prev_col };
        let col = col_base + x_delta;
        prev_row = row;
        prev_col = col + 1;
        pairs.push((row << 6) | col);
    }
    pairs
}

fn compress_pairs(lg_k: u8, pairs: &[u32]) -> Vec<u32> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let k = 1u64 << lg_k;
    let num_pairs = pairs.len() as u64;
    let num_base_bits = golomb_choose_number_of_base_bits(k, num_pairs);
    low_level_compress_pairs(pairs, num_base_bits)
}

fn decompress_pairs(lg_k: u8, words: &[u32], num_pairs: u32) -> Vec<u32> {
    if num_pairs == 0 {
        return Vec::new();
    }
    let k = 1u64 << lg_k;
    let num_base_bits = golomb_choose_number_of_base_bits(k, num_pairs as u64);
    low_level_uncompress_pairs(words, num_pairs, num_base_bits)
}

fn compress_window_bytes(window: &[u8], pseudo_phase: usize) -> Vec<u32> {
    let mut bw = BitWriter::new();
    let enc = &WINDOW_BYTE_TABLES[pseudo_phase].0;
    for &byte in window {
        let code_info = enc[byte as usize];
        bw.put_bits(code_info & 0xfff, (code_info >> 12) as u8);
    }
    bw.pad(11);
    bw.finish()
}

fn uncompress_window_bytes(words: &[u32], k: usize, pseudo_phase: usize) -> Vec<u8> {
    let mut br = BitReader::new(words);
    let dec = &WINDOW_BYTE_TABLES[pseudo_phase].1;
    let mut window = vec![0u8; k];
    for slot in window.iter_mut() {
        let peek = br.peek(12);
        let entry = dec[peek as usize];
        *slot = (entry & 0xff) as u8;
        br.consume((entry >> 8) as u8);
    }
    window
}

/// The empty space this leaves at the front of the output is filled in
/// later by the caller (the table-derived pairs, already sorted).
fn tricky_get_pairs_from_window(window: &[u8], empty_space: usize) -> Vec<u32> {
    let mut pairs = Vec::new();
    for (row, &byte) in window.iter().enumerate() {
        let mut remaining = byte;
        while remaining != 0 {
            let col = remaining.trailing_zeros();
            remaining &= !(1 << col);
            pairs.push(((row as u32) << 6) | col);
        }
    }
    let mut out = vec![0u32; empty_space + pairs.len()];
    out[empty_space..].copy_from_slice(&pairs);
    out
}

pub(super) fn compress_sparse(lg_k: u8, mut table_pairs: Vec<u32>) -> CompressedStreams {
    super::pair_table::introspective_insertion_sort(&mut table_pairs);
    CompressedStreams {
        csv: compress_pairs(lg_k, &table_pairs),
        cw: Vec::new(),
    }
}

pub(super) fn decompress_sparse(lg_k: u8, csv: &[u32], num_coupons: u64) -> Vec<u32> {
    decompress_pairs(lg_k, csv, num_coupons as u32)
}

pub(super) fn compress_hybrid(
    lg_k: u8,
    window: &[u8],
    mut table_pairs: Vec<u32>,
    num_coupons: u64,
) -> CompressedStreams {
    super::pair_table::introspective_insertion_sort(&mut table_pairs);
    let window_pairs = tricky_get_pairs_from_window(window, 0);
    let all_pairs = merge_pairs(&table_pairs, &window_pairs);
    debug_assert_eq!(all_pairs.len() as u64, num_coupons);
    CompressedStreams {
        csv: compress_pairs(lg_k, &all_pairs),
        cw: Vec::new(),
    }
}

/// Returns `(window, table_pairs)`: pairs whose column is `< 8` go back
/// into the window, the rest return to the pair table.
pub(super) fn decompress_hybrid(lg_k: u8, csv: &[u32], num_coupons: u64) -> (Vec<u8>, Vec<u32>) {
    let k = 1usize << lg_k;
    let pairs = decompress_pairs(lg_k, csv, num_coupons as u32);
    let mut window = vec![0u8; k];
    let mut table_pairs = Vec::new();
    for pair in pairs {
        let row = (pair >> 6) as usize;
        let col = pair & 63;
        if col < 8 {
            window[row] |= 1u8 << col;
        } else {
            table_pairs.push(pair);
        }
    }
    (window, table_pairs)
}

/// Compresses a window stream with no accompanying surprise-pair stream
/// (a Pinned/Sliding sketch whose pair table happens to be empty).
pub(super) fn compress_window_only(lg_k: u8, window: &[u8], num_coupons: u64) -> Vec<u32> {
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    compress_window_bytes(window, pseudo_phase)
}

/// Inverse of [`compress_window_only`].
pub(super) fn uncompress_window_only(cw: &[u32], k: usize, lg_k: u8, num_coupons: u64) -> Vec<u8> {
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    uncompress_window_bytes(cw, k, pseudo_phase)
}

pub(super) fn compress_pinned(
    lg_k: u8,
    window: &[u8],
    surprise_pairs: Vec<u32>,
    num_coupons: u64,
) -> CompressedStreams {
    let mut shifted: Vec<u32> = surprise_pairs
        .into_iter()
        .map(|pair| {
            let row = pair >> 6;
            let col = (pair & 63).wrapping_sub(8) & 63;
            (row << 6) | col
        })
        .collect();
    super::pair_table::introspective_insertion_sort(&mut shifted);
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    CompressedStreams {
        cw: compress_window_bytes(window, pseudo_phase),
        csv: compress_pairs(lg_k, &shifted),
    }
}

pub(super) fn decompress_pinned(
    lg_k: u8,
    cw: &[u32],
    csv: &[u32],
    num_coupons: u64,
    num_sv: u64,
) -> (Vec<u8>, Vec<u32>) {
    let k = 1usize << lg_k;
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    let window = uncompress_window_bytes(cw, k, pseudo_phase);
    let shifted = decompress_pairs(lg_k, csv, num_sv as u32);
    let table_pairs = shifted
        .into_iter()
        .map(|pair| {
            let row = pair >> 6;
            let col = (pair & 63).wrapping_add(8) & 63;
            (row << 6) | col
        })
        .collect();
    (window, table_pairs)
}

/// Sliding surprise columns are rotated relative to the window offset, then
/// run through a per-phase permutation, before being Golomb-coded the same
/// way Pinned's are.
pub(super) fn compress_sliding(
    lg_k: u8,
    window: &[u8],
    surprise_pairs: Vec<u32>,
    num_coupons: u64,
    window_offset: u8,
) -> CompressedStreams {
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    let (encode, _) = &COLUMN_PERMUTATION_TABLES[pseudo_phase];
    let mut transformed: Vec<u32> = surprise_pairs
        .into_iter()
        .map(|pair| {
            let row = pair >> 6;
            let col = pair & 63;
            let rotated = (col.wrapping_add(56).wrapping_sub(window_offset as u32)) & 63;
            let permuted = encode[rotated as usize] as u32;
            (row << 6) | permuted
        })
        .collect();
    super::pair_table::introspective_insertion_sort(&mut transformed);
    CompressedStreams {
        cw: compress_window_bytes(window, pseudo_phase),
        csv: compress_pairs(lg_k, &transformed),
    }
}

pub(super) fn decompress_sliding(
    lg_k: u8,
    cw: &[u32],
    csv: &[u32],
    num_coupons: u64,
    num_sv: u64,
    window_offset: u8,
) -> (Vec<u8>, Vec<u32>) {
    let k = 1usize << lg_k;
    let pseudo_phase = determine_pseudo_phase(lg_k, num_coupons);
    let window = uncompress_window_bytes(cw, k, pseudo_phase);
    let (_, decode) = &COLUMN_PERMUTATION_TABLES[pseudo_phase];
    let transformed = decompress_pairs(lg_k, csv, num_sv as u32);
    let table_pairs = transformed
        .into_iter()
        .map(|pair| {
            let row = pair >> 6;
            let permuted = pair & 63;
            let rotated = decode[permuted as usize] as u32;
            let col = (rotated.wrapping_add(window_offset as u32).wrapping_add(8)) & 63;
            (row << 6) | col
        })
        .collect();
    (window, table_pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_round_trips() {
        let lg_k = 10;
        let pairs = vec![5u32, 200, 1000, 70000];
        let compressed = compress_sparse(lg_k, pairs.clone());
        let decompressed = decompress_sparse(lg_k, &compressed.csv, pairs.len() as u64);
        let mut expected = pairs;
        expected.sort_unstable();
        let mut got = decompressed;
        got.sort_unstable();
        assert_eq!(expected, got);
    }

    #[test]
    fn pinned_round_trips_window_and_pairs() {
        let lg_k = 6;
        let k = 1usize << lg_k;
        let mut window = vec![0u8; k];
        window[0] = 0b0000_0101;
        window[3] = 0b1111_0000;
        let surprises = vec![(2u32 << 6) | 40, (5u32 << 6) | 63];
        let num_coupons = (k as u64) + surprises.len() as u64; // arbitrary but consistent-ish
        let compressed = compress_pinned(lg_k, &window, surprises.clone(), num_coupons);
        let (dec_window, dec_pairs) =
            decompress_pinned(lg_k, &compressed.cw, &compressed.csv, num_coupons, surprises.len() as u64);
        assert_eq!(dec_window, window);
        let mut expected = surprises;
        expected.sort_unstable();
        let mut got = dec_pairs;
        got.sort_unstable();
        assert_eq!(expected, got);
    }

    #[test]
    fn sliding_round_trips_window_and_pairs() {
        let lg_k = 6;
        let k = 1usize << lg_k;
        let offset = 3u8;
        let mut window = vec![0u8; k];
        window[0] = 0b0000_0101;
        window[3] = 0b1111_0000;
        let surprises = vec![(2u32 << 6) | 40, (5u32 << 6) | 1];
        let num_coupons = (k as u64) + surprises.len() as u64;
        let compressed = compress_sliding(lg_k, &window, surprises.clone(), num_coupons, offset);
        let (dec_window, dec_pairs) = decompress_sliding(
            lg_k,
            &compressed.cw,
            &compressed.csv,
            num_coupons,
            surprises.len() as u64,
            offset,
        );
        assert_eq!(dec_window, window);
        let mut expected = surprises;
        expected.sort_unstable();
        let mut got = dec_pairs;
        got.sort_unstable();
        assert_eq!(expected, got);
    }

    #[test]
    fn hybrid_round_trips() {
        let lg_k = 6;
        let k = 1usize << lg_k;
        let mut window = vec![0u8; k];
        window[1] = 0b0000_0011; // coupons (1,0) and (1,1)
        let table_pairs = vec![(4u32 << 6) | 10, (4u32 << 6) | 20];
        let num_coupons = 2 + table_pairs.len() as u64;
        let compressed = compress_hybrid(lg_k, &window, table_pairs.clone(), num_coupons);
        let (dec_window, dec_table) = decompress_hybrid(lg_k, &compressed.csv, num_coupons);
        assert_eq!(dec_window, window);
        let mut expected = table_pairs;
        expected.sort_unstable();
        let mut got = dec_table;
        got.sort_unstable();
        assert_eq!(expected, got);
    }
}
