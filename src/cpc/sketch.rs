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

//! The CPC sketch: a compact, mergeable estimator of the number of distinct
//! items in a stream.

use crate::cpc::pair_table::PairTable;
use crate::cpc::{confidence, estimator, Flavor, DEFAULT_LG_K, MAX_LG_K, MIN_LG_K};
use crate::error::Error;
use crate::hash;

/// Implemented for every input type [`CpcSketch::update`] accepts.
pub trait Hashable {
    /// Returns the 128-bit hash (as two halves) used to derive this item's
    /// coupon.
    fn cpc_hash(&self, seed: u64) -> (u64, u64);

    /// An empty byte/string/slice input is a no-op: it carries no
    /// information to hash and must not register a coupon. Scalars are
    /// never empty.
    fn is_empty_input(&self) -> bool {
        false
    }
}

impl Hashable for u64 {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_u64(*self, seed)
    }
}

impl Hashable for i64 {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_i64(*self, seed)
    }
}

impl Hashable for f64 {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_f64(*self, seed)
    }
}

impl Hashable for &str {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_str(self, seed)
    }

    fn is_empty_input(&self) -> bool {
        self.is_empty()
    }
}

impl Hashable for &[u8] {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_bytes(self, seed)
    }

    fn is_empty_input(&self) -> bool {
        self.is_empty()
    }
}

impl Hashable for &[i32] {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_i32_slice(self, seed)
    }

    fn is_empty_input(&self) -> bool {
        self.is_empty()
    }
}

impl Hashable for &[i64] {
    fn cpc_hash(&self, seed: u64) -> (u64, u64) {
        hash::hash_i64_slice(self, seed)
    }

    fn is_empty_input(&self) -> bool {
        self.is_empty()
    }
}

/// A Compressed Probabilistic Counting sketch.
///
/// Invariants:
/// - `window_offset + 8 <= 64` always (columns never exceed `63`).
/// - `sliding_window` is `Some` only once the sketch has left the Sparse
///   flavor; `pair_table` is `None` only while Empty.
/// - `kxp`/`hip_est_accum` track a running HIP estimate valid only while
///   `merge_flag` is `false`; once a sketch is produced by a union its HIP
///   state is meaningless and estimates fall back to ICON.
#[derive(Debug, Clone)]
pub struct CpcSketch {
    lg_k: u8,
    seed: u64,
    num_coupons: u64,
    first_interesting_column: u8,
    merge_flag: bool,
    window_offset: u8,
    sliding_window: Option<Vec<u8>>,
    pair_table: Option<PairTable>,
    kxp: f64,
    hip_est_accum: f64,
}

impl CpcSketch {
    /// Creates an empty sketch with [`DEFAULT_LG_K`] and the default seed.
    pub fn new() -> Result<Self, Error> {
        Self::with_lg_k(DEFAULT_LG_K)
    }

    /// Creates an empty sketch with the given `lgK` and the default seed.
    pub fn with_lg_k(lg_k: u8) -> Result<Self, Error> {
        Self::with_lg_k_and_seed(lg_k, hash::DEFAULT_UPDATE_SEED)
    }

    /// Creates an empty sketch with the given `lgK` and hash seed.
    pub fn with_lg_k_and_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_parameter(format!(
                "lgK must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            ))
            .with_context("lg_k", lg_k));
        }
        Ok(Self {
            lg_k,
            seed,
            num_coupons: 0,
            first_interesting_column: 0,
            merge_flag: false,
            window_offset: 0,
            sliding_window: None,
            pair_table: None,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn from_raw_parts(
        lg_k: u8,
        seed: u64,
        num_coupons: u64,
        first_interesting_column: u8,
        merge_flag: bool,
        window_offset: u8,
        sliding_window: Option<Vec<u8>>,
        pair_table: Option<PairTable>,
        kxp: f64,
        hip_est_accum: f64,
    ) -> Self {
        Self {
            lg_k,
            seed,
            num_coupons,
            first_interesting_column,
            merge_flag,
            window_offset,
            sliding_window,
            pair_table,
            kxp,
            hip_est_accum,
        }
    }

    /// Reconstructs a merge-flavored sketch directly from a full `K`-row bit
    /// matrix (used by [`super::CpcUnion::to_sketch`] when the union is
    /// holding an accumulator matrix rather than a wrapped sketch).
    pub(super) fn from_bit_matrix(lg_k: u8, seed: u64, matrix: &[u64]) -> Self {
        let num_coupons = super::bit_matrix::count_bits_set(matrix);
        let flavor = Flavor::determine(lg_k, num_coupons);
        let k = 1usize << lg_k;

        let mut sketch = Self {
            lg_k,
            seed,
            num_coupons: 0,
            first_interesting_column: 0,
            merge_flag: true,
            window_offset: 0,
            sliding_window: None,
            pair_table: None,
            kxp: k as f64,
            hip_est_accum: 0.0,
        };

        match flavor {
            Flavor::Empty => {}
            Flavor::Sparse => {
                let mut table = PairTable::new(2, 6 + lg_k);
                for (row, &word) in matrix.iter().enumerate() {
                    let mut bits = word;
                    while bits != 0 {
                        let col = bits.trailing_zeros();
                        bits &= bits - 1;
                        table.must_insert(((row as u32) << 6) | col);
                    }
                }
                sketch.num_coupons = table.num_pairs() as u64;
                sketch.pair_table = Some(table);
            }
            Flavor::Hybrid => {
                let mut window = vec![0u8; k];
                let mut table = PairTable::new(2, 6 + lg_k);
                for (row, &word) in matrix.iter().enumerate() {
                    window[row] = (word & 0xff) as u8;
                    let mut bits = word >> 8;
                    let mut col = 8u32;
                    while bits != 0 {
                        if bits & 1 != 0 {
                            table.must_insert(((row as u32) << 6) | col);
                        }
                        bits >>= 1;
                        col += 1;
                    }
                }
                sketch.num_coupons = num_coupons;
                sketch.sliding_window = Some(window);
                sketch.pair_table = if table.is_empty() { None } else { Some(table) };
            }
            Flavor::Pinned | Flavor::Sliding => {
                let offset = target_window_offset(lg_k, num_coupons);
                let (window, surprises, fi_col) =
                    super::bit_matrix::windowed_view_of_matrix(lg_k, matrix, offset);
                let mut table = PairTable::new(2, 6 + lg_k);
                for pair in surprises {
                    table.must_insert(pair);
                }
                sketch.num_coupons = num_coupons;
                sketch.window_offset = offset;
                sketch.first_interesting_column = fi_col;
                sketch.sliding_window = Some(window);
                sketch.pair_table = if table.is_empty() { None } else { Some(table) };
            }
        }

        sketch
    }

    /// Registers one item's membership in the stream. An empty byte slice,
    /// string, or integer slice carries no information and is a no-op.
    pub fn update<T: Hashable>(&mut self, datum: T) {
        if datum.is_empty_input() {
            return;
        }
        let (h0, h1) = datum.cpc_hash(self.seed);
        self.update_with_hash(h0, h1);
    }

    fn update_with_hash(&mut self, h0: u64, h1: u64) {
        let col = (h1.trailing_zeros() as u8).min(63);
        let k = 1u64 << self.lg_k;
        let row = (h0 % k) as u32;
        let mut row_col = (row << 6) | (col as u32);
        if row_col == u32::MAX {
            // Never collide with the pair table's empty-slot sentinel.
            row_col ^= 1 << 6;
        }
        self.row_col_update(row_col);
    }

    /// Applies an already-assembled `(row, col)` pair as if it had just been
    /// hashed. Shared by the hashed update path and by a union replaying a
    /// source sketch's pairs into its own accumulator.
    pub(super) fn row_col_update(&mut self, row_col: u32) {
        let col = (row_col & 63) as u8;
        if col < self.first_interesting_column {
            return;
        }
        let k = 1u64 << self.lg_k;
        if 32 * self.num_coupons < 3 * k {
            self.update_sparse(row_col);
            if 32 * self.num_coupons >= 3 * k {
                self.promote_sparse_to_windowed();
            }
        } else {
            self.update_windowed(row_col);
            self.sync_window_offset();
        }
    }

    fn update_sparse(&mut self, row_col: u32) {
        let lg_k = self.lg_k;
        let table = self.pair_table.get_or_insert_with(|| PairTable::new(2, 6 + lg_k));
        if table.maybe_insert(row_col) {
            self.update_hip();
            self.num_coupons += 1;
        }
    }

    fn promote_sparse_to_windowed(&mut self) {
        let k = 1usize << self.lg_k;
        let lg_k = self.lg_k;
        let old_table = self.pair_table.take().unwrap_or_else(|| PairTable::new(2, 6 + lg_k));
        let mut window = vec![0u8; k];
        let mut new_table = PairTable::new(2, 6 + lg_k);
        for pair in old_table.unwrap() {
            let row = (pair >> 6) as usize;
            let col = pair & 63;
            if col < 8 {
                window[row] |= 1u8 << col;
            } else {
                new_table.must_insert(pair);
            }
        }
        self.window_offset = 0;
        self.sliding_window = Some(window);
        self.pair_table = if new_table.is_empty() { None } else { Some(new_table) };
    }

    fn update_windowed(&mut self, row_col: u32) {
        let col = row_col & 63;
        let row = (row_col >> 6) as usize;
        let offset = self.window_offset as u32;

        if col < offset {
            // Already implicitly represented by the early zone.
            return;
        }

        if col < offset + 8 {
            let k = 1usize << self.lg_k;
            let window = self.sliding_window.get_or_insert_with(|| vec![0u8; k]);
            let bit = 1u8 << (col - offset);
            if window[row] & bit == 0 {
                window[row] |= bit;
                self.update_hip();
                self.num_coupons += 1;
            }
        } else {
            let lg_k = self.lg_k;
            let table = self.pair_table.get_or_insert_with(|| PairTable::new(2, 6 + lg_k));
            if table.maybe_insert(row_col) {
                self.update_hip();
                self.num_coupons += 1;
            }
        }
    }

    fn update_hip(&mut self) {
        let k = (1u64 << self.lg_k) as f64;
        self.hip_est_accum += k / self.kxp;
        let c = self.num_coupons;
        self.kxp -= (2f64).powi(-((c + 1) as i32));
    }

    fn sync_window_offset(&mut self) {
        let target = target_window_offset(self.lg_k, self.num_coupons);
        while self.window_offset < target {
            self.modify_offset();
        }
    }

    /// Slides the window up by one column.
    ///
    /// The column vacated at the bottom becomes part of the early zone
    /// (implicitly `1`); any row where that column was actually still `0`
    /// must be recorded as a surprise-of-0, so the window and pair table are
    /// rebuilt wholesale from the full bit matrix rather than shifted in
    /// place. Every eighth slide also re-derives `kxp` from the matrix,
    /// since the incremental HIP update alone drifts from the true value
    /// once enough columns have left the window.
    fn modify_offset(&mut self) {
        let lg_k = self.lg_k;
        let new_offset = self.window_offset + 1;

        let surprises = self.pair_table.as_ref().map(|t| t.unwrap()).unwrap_or_default();
        let matrix = super::bit_matrix::bit_matrix_of_sketch(
            lg_k,
            self.window_offset,
            self.sliding_window.as_deref(),
            surprises.into_iter(),
        );

        if new_offset % 8 == 0 {
            self.kxp = recompute_kxp(&matrix);
        }

        let (window, surprises, fi_col) =
            super::bit_matrix::windowed_view_of_matrix(lg_k, &matrix, new_offset);
        let mut table = PairTable::new(2, 6 + lg_k);
        for pair in surprises {
            table.must_insert(pair);
        }

        self.sliding_window = Some(window);
        self.pair_table = if table.is_empty() { None } else { Some(table) };
        self.first_interesting_column = fi_col;
        self.window_offset = new_offset;
    }

    /// The estimated number of distinct items seen so far.
    pub fn get_estimate(&self) -> f64 {
        if self.num_coupons == 0 {
            return 0.0;
        }
        if self.merge_flag {
            estimator::icon_estimate(self.lg_k, self.num_coupons)
        } else {
            self.hip_est_accum
        }
    }

    /// A lower confidence bound on the true cardinality, `kappa` standard
    /// deviations out.
    pub fn get_lower_bound(&self, kappa: crate::common::NumStdDev) -> f64 {
        if self.merge_flag {
            confidence::icon_confidence_lb(self.lg_k, self.num_coupons, kappa)
        } else {
            confidence::hip_confidence_lb(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        }
    }

    /// An upper confidence bound on the true cardinality, `kappa` standard
    /// deviations out.
    pub fn get_upper_bound(&self, kappa: crate::common::NumStdDev) -> f64 {
        if self.merge_flag {
            confidence::icon_confidence_ub(self.lg_k, self.num_coupons, kappa)
        } else {
            confidence::hip_confidence_ub(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        }
    }

    /// Discards all accumulated state, keeping `lgK` and the hash seed.
    pub fn reset(&mut self) {
        *self = Self::with_lg_k_and_seed(self.lg_k, self.seed)
            .expect("lgK was already validated by the existing sketch");
    }

    /// Serializes this sketch to its compact compressed wire format.
    pub fn serialize(&self) -> Vec<u8> {
        super::serialization::serialize(self)
    }

    /// Deserializes a sketch previously produced by [`CpcSketch::serialize`],
    /// using the default hash seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_bytes_with_seed(bytes, hash::DEFAULT_UPDATE_SEED)
    }

    /// Like [`CpcSketch::from_bytes`], but validates against a caller-chosen
    /// seed instead of the default.
    pub fn from_bytes_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        super::serialization::deserialize(bytes, seed)
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    pub(super) fn num_coupons(&self) -> u64 {
        self.num_coupons
    }

    pub(super) fn first_interesting_column(&self) -> u8 {
        self.first_interesting_column
    }

    pub(super) fn merge_flag(&self) -> bool {
        self.merge_flag
    }

    pub(super) fn window_offset(&self) -> u8 {
        self.window_offset
    }

    pub(super) fn sliding_window(&self) -> Option<&[u8]> {
        self.sliding_window.as_deref()
    }

    pub(super) fn pair_table(&self) -> Option<&PairTable> {
        self.pair_table.as_ref()
    }

    pub(super) fn kxp(&self) -> f64 {
        self.kxp
    }

    pub(super) fn hip_est_accum(&self) -> f64 {
        self.hip_est_accum
    }

    pub(super) fn flavor(&self) -> Flavor {
        Flavor::determine(self.lg_k, self.num_coupons)
    }

    pub(super) fn set_merge_flag(&mut self, merge_flag: bool) {
        self.merge_flag = merge_flag;
    }
}

impl Default for CpcSketch {
    fn default() -> Self {
        Self::new().expect("DEFAULT_LG_K is always within range")
    }
}

/// The window's target distance from column `0`, given the current coupon
/// count: `max(0, (8*C - 19*K) / (8*K))` using integer division, a
/// monotonically increasing function of `numCoupons / K` that reaches its
/// cap of `56` (`64 - 8`) well before the Sliding flavor's numeric upper
/// range.
pub(super) fn target_window_offset(lg_k: u8, num_coupons: u64) -> u8 {
    let k = 1i64 << lg_k;
    let c = num_coupons as i64;
    let numerator = 8 * c - 19 * k;
    let raw = if numerator <= 0 { 0 } else { numerator / (8 * k) };
    raw.clamp(0, 56) as u8
}

/// `kxpByteLookup[b]`: the sum, over bit positions `c` in `[0, 8)` where bit
/// `c` of `b` is *unset*, of `2^-(c+1)`.
fn kxp_contribution_for_byte(byte: u8) -> f64 {
    let mut sum = 0.0;
    for bit in 0..8u32 {
        if byte & (1 << bit) == 0 {
            sum += 2f64.powi(-(bit as i32 + 1));
        }
    }
    sum
}

/// Re-derives `kxp` from scratch by walking every row's 8 bytes, used when a
/// window slide crosses a byte boundary (`newOffset % 8 == 0`) to correct
/// for the drift the incremental HIP update accumulates.
fn recompute_kxp(matrix: &[u64]) -> f64 {
    let mut kxp = 0.0;
    for &word in matrix {
        for byte_index in 0..8u32 {
            let byte = ((word >> (8 * byte_index)) & 0xff) as u8;
            kxp += kxp_contribution_for_byte(byte) * 2f64.powi(-(8 * byte_index as i32));
        }
    }
    kxp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_out_of_range_lg_k() {
        assert!(CpcSketch::with_lg_k(MIN_LG_K - 1).is_err());
        assert!(CpcSketch::with_lg_k(MAX_LG_K + 1).is_err());
        assert!(CpcSketch::with_lg_k(MIN_LG_K).is_ok());
        assert!(CpcSketch::with_lg_k(MAX_LG_K).is_ok());
    }

    #[test]
    fn empty_sketch_estimates_zero() {
        let sketch = CpcSketch::with_lg_k(10).unwrap();
        assert_eq!(sketch.get_estimate(), 0.0);
        assert!(sketch.is_empty());
    }

    #[test]
    fn updating_with_the_same_item_does_not_grow_the_estimate_much() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        for _ in 0..1000 {
            sketch.update(42u64);
        }
        assert!(sketch.get_estimate() < 2.0);
    }

    #[test]
    fn distinct_updates_grow_a_plausible_estimate() {
        let mut sketch = CpcSketch::with_lg_k(11).unwrap();
        for i in 0..20_000u64 {
            sketch.update(i);
        }
        let est = sketch.get_estimate();
        assert!(est > 15_000.0 && est < 25_000.0, "estimate was {est}");
    }

    #[test]
    fn reset_clears_state_but_keeps_lg_k_and_seed() {
        let mut sketch = CpcSketch::with_lg_k_and_seed(9, 777).unwrap();
        for i in 0..500u64 {
            sketch.update(i);
        }
        sketch.reset();
        assert_eq!(sketch.get_estimate(), 0.0);
        assert_eq!(sketch.lg_k(), 9);
        assert_eq!(sketch.seed(), 777);
    }

    #[test]
    fn sketch_transitions_through_flavors_as_it_fills() {
        let mut sketch = CpcSketch::with_lg_k(4).unwrap();
        assert_eq!(sketch.flavor(), Flavor::Empty);
        for i in 0..2000u64 {
            sketch.update(i);
            assert!(sketch.window_offset() <= 56);
        }
        assert_ne!(sketch.flavor(), Flavor::Empty);
    }

    #[test]
    fn empty_string_bytes_and_slices_are_a_no_op() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        sketch.update("");
        sketch.update(&[] as &[u8]);
        sketch.update(&[] as &[i32]);
        sketch.update(&[] as &[i64]);
        assert!(sketch.is_empty());
        assert_eq!(sketch.num_coupons(), 0);
    }

    #[test]
    fn target_window_offset_matches_the_closed_form() {
        let k = 1u64 << 11;
        assert_eq!(target_window_offset(11, 3 * k), 0);
        assert_eq!(target_window_offset(11, 0), 0);
        // 8*C - 19*K grows by 8 per extra coupon; offset should climb
        // roughly every K/8 additional coupons once past the 19/8*K mark.
        let c = 19 * k / 8 + k; // well past the threshold
        let offset = target_window_offset(11, c);
        assert!(offset > 0);
    }

    #[test]
    fn popcount_matches_num_coupons_after_many_window_slides() {
        let mut sketch = CpcSketch::with_lg_k(4).unwrap();
        for i in 0..5000u64 {
            sketch.update(i);
        }
        let surprises = sketch.pair_table.as_ref().map(|t| t.unwrap()).unwrap_or_default();
        let matrix = super::super::bit_matrix::bit_matrix_of_sketch(
            sketch.lg_k,
            sketch.window_offset,
            sketch.sliding_window.as_deref(),
            surprises.into_iter(),
        );
        let total_bits: u64 = matrix.iter().map(|row| row.count_ones() as u64).sum();
        assert_eq!(total_bits, sketch.num_coupons());
        assert!(sketch.first_interesting_column <= sketch.window_offset);
    }
}
