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

//! K x 64 bit-grid helpers shared by the sketch, the union, and the codec.

/// ORs every row of `src` (at `src_lg_k`) into `dest` (at `dest_lg_k`),
/// wrapping row indices modulo the destination's row count.
///
/// # Panics
///
/// Panics if `dest_lg_k > src_lg_k`.
pub(super) fn or_matrix_into(dest: &mut [u64], dest_lg_k: u8, src: &[u64], src_lg_k: u8) {
    assert!(dest_lg_k <= src_lg_k, "cannot OR a smaller matrix into a larger one");
    let dest_k = 1usize << dest_lg_k;
    for (src_row, &word) in src.iter().enumerate() {
        dest[src_row % dest_k] |= word;
    }
}

/// Total number of set bits across the whole matrix.
pub(super) fn count_bits_set(matrix: &[u64]) -> u64 {
    matrix.iter().map(|row| row.count_ones() as u64).sum()
}

/// Reconstructs the full `K`-row bit matrix for a sketch given its window
/// state and surprise pairs.
///
/// Every row is seeded with `(1 << window_offset) - 1` implicit early-zone
/// ones, the sliding window (if present) is OR'd in at `window_offset`, and
/// every surprise pair toggles its bit (flipping early-zone ones to zero,
/// or setting bits at/above the window to one).
pub(super) fn bit_matrix_of_sketch(
    lg_k: u8,
    window_offset: u8,
    window: Option<&[u8]>,
    surprise_pairs: impl Iterator<Item = u32>,
) -> Vec<u64> {
    let k = 1usize << lg_k;
    let early_zone_mask: u64 = if window_offset == 0 {
        0
    } else {
        (1u64 << window_offset) - 1
    };
    let mut matrix = vec![early_zone_mask; k];
    if let Some(window) = window {
        for (row, &byte) in window.iter().enumerate() {
            matrix[row] |= (byte as u64) << window_offset;
        }
    }
    for pair in surprise_pairs {
        let row = (pair >> 6) as usize;
        let col = pair & 63;
        matrix[row] ^= 1u64 << col;
    }
    matrix
}

/// Re-derives a windowed representation (sliding-window bytes, surprise
/// pairs, and `fiCol`) from a full bit matrix at the given window offset.
///
/// Shared by `modify_offset` (sliding a sketch's own window forward one
/// column) and by reconstructing a sketch from a union's accumulated bit
/// matrix: both need the same "extract the window byte, flip the early
/// zone, collect the remaining surprises" pass.
pub(super) fn windowed_view_of_matrix(lg_k: u8, matrix: &[u64], offset: u8) -> (Vec<u8>, Vec<u32>, u8) {
    let k = 1usize << lg_k;
    let window_mask: u64 = 0xffu64 << offset;
    let early_zone_mask: u64 = if offset == 0 { 0 } else { (1u64 << offset) - 1 };

    let mut window = vec![0u8; k];
    let mut surprises = Vec::new();
    let mut surprises_or = 0u64;

    for (row, &word) in matrix.iter().enumerate() {
        window[row] = ((word >> offset) & 0xff) as u8;
        let masked = (word & !window_mask) ^ early_zone_mask;
        surprises_or |= masked;
        let mut bits = masked;
        while bits != 0 {
            let col = bits.trailing_zeros();
            bits &= bits - 1;
            surprises.push(((row as u32) << 6) | col);
        }
    }

    let fi_col = offset.min(surprises_or.trailing_zeros() as u8);
    (window, surprises, fi_col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_matrix_into_wraps_rows() {
        let src = vec![1u64, 2, 4, 8];
        let mut dest = vec![0u64; 2];
        or_matrix_into(&mut dest, 1, &src, 2);
        assert_eq!(dest, vec![1 | 4, 2 | 8]);
    }

    #[test]
    fn count_bits_set_sums_popcounts() {
        assert_eq!(count_bits_set(&[0b101, 0b11]), 3);
    }

    #[test]
    fn bit_matrix_with_no_window_or_surprises_is_early_zone_only() {
        let m = bit_matrix_of_sketch(4, 3, None, std::iter::empty());
        assert!(m.iter().all(|&row| row == 0b111));
    }

    #[test]
    fn surprise_toggles_early_zone_bit_off() {
        let m = bit_matrix_of_sketch(4, 3, None, std::iter::once(0u32 << 6 | 1));
        assert_eq!(m[0], 0b101);
    }

    #[test]
    fn windowed_view_round_trips_a_window_and_early_zone_surprise() {
        let window = vec![0b101u8, 0, 0, 0];
        let surprises = vec![1u32]; // row 0, col 1, inside the offset-2 early zone
        let matrix = bit_matrix_of_sketch(2, 2, Some(&window), surprises.into_iter());

        let (view_window, view_surprises, fi_col) = windowed_view_of_matrix(2, &matrix, 2);
        assert_eq!(view_window, window);
        assert_eq!(view_surprises, vec![1u32]);
        assert_eq!(fi_col, 1);
    }

    #[test]
    fn windowed_view_with_no_surprises_sets_fi_col_to_the_offset() {
        let matrix = bit_matrix_of_sketch(2, 2, None, std::iter::empty());
        let (_, surprises, fi_col) = windowed_view_of_matrix(2, &matrix, 2);
        assert!(surprises.is_empty());
        assert_eq!(fi_col, 2);
    }
}
