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

//! Combines multiple [`CpcSketch`]es into one, at a caller-chosen `lgK`.

use crate::cpc::bit_matrix;
use crate::cpc::pair_table::PairTable;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::{Flavor, MAX_LG_K, MIN_LG_K};
use crate::error::Error;
use crate::hash;

const INVERSE_GOLDEN: f64 = 0.618_033_988_749_894_9;

/// The union holds either a live accumulator sketch (cheap while the result
/// stays Sparse) or a raw bit matrix once any folded-in source has grown
/// past Sparse. The transition from accumulator to matrix is one-way:
/// once a union "graduates" to a matrix it never goes back, since a matrix
/// cannot be un-learned into a sparse pair set.
enum UnionState {
    Accumulator(CpcSketch),
    Matrix(Vec<u64>),
}

/// Accumulates coupons from any number of [`CpcSketch`]es sharing a hash
/// seed, materializing a full `K`-row bit matrix only once some folded-in
/// source outgrows the Sparse flavor.
pub struct CpcUnion {
    lg_k: u8,
    seed: u64,
    state: UnionState,
}

impl CpcUnion {
    /// Creates a union with the given `lgK` and the default hash seed.
    pub fn new(lg_k: u8) -> Result<Self, Error> {
        Self::with_seed(lg_k, hash::DEFAULT_UPDATE_SEED)
    }

    /// Creates a union with the given `lgK` and hash seed.
    pub fn with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_parameter(format!(
                "lgK must be in [{MIN_LG_K}, {MAX_LG_K}], got {lg_k}"
            ))
            .with_context("lg_k", lg_k));
        }
        Ok(Self {
            lg_k,
            seed,
            state: UnionState::Accumulator(CpcSketch::with_lg_k_and_seed(lg_k, seed)?),
        })
    }

    /// Folds `source` into this union.
    ///
    /// A source with a larger `lgK` is folded in at the union's own `lgK`
    /// (its rows are OR'd together modulo the union's row count). A source
    /// with a *smaller* `lgK` instead shrinks the union permanently: every
    /// row folded in so far, and every row folded in afterwards, is
    /// reconciled at the smaller `lgK`, since a union can never hold more
    /// row resolution than its narrowest source allows.
    pub fn update(&mut self, source: &CpcSketch) -> Result<(), Error> {
        let expected = hash::seed_hash(self.seed);
        let actual = hash::seed_hash(source.seed());
        if expected != actual {
            return Err(Error::seed_hash_mismatch(expected, actual));
        }
        if source.is_empty() {
            return Ok(());
        }
        if source.lg_k() < self.lg_k {
            self.downsample_to(source.lg_k());
        }

        if source.flavor() > Flavor::Sparse {
            self.graduate();
        }

        match &mut self.state {
            UnionState::Accumulator(acc) => {
                if acc.is_empty() && acc.lg_k() == source.lg_k() {
                    *acc = source.clone();
                } else if let Some(table) = source.pair_table() {
                    walk_table_updating_sketch(acc, table);
                }
                if acc.flavor() > Flavor::Sparse {
                    self.graduate();
                }
            }
            UnionState::Matrix(matrix) => {
                let surprises = source.pair_table().map(|table| table.unwrap()).unwrap_or_default();
                let src_matrix = bit_matrix::bit_matrix_of_sketch(
                    source.lg_k(),
                    source.window_offset(),
                    source.sliding_window(),
                    surprises.into_iter(),
                );
                bit_matrix::or_matrix_into(matrix, self.lg_k, &src_matrix, source.lg_k());
            }
        }
        Ok(())
    }

    /// Shrinks the union's own `lgK` down to `new_lg_k`, folding existing
    /// state into the smaller row space. One-way, like graduation: the
    /// union can only ever shrink from here.
    fn downsample_to(&mut self, new_lg_k: u8) {
        match &mut self.state {
            UnionState::Matrix(matrix) => {
                let mut smaller = vec![0u64; 1usize << new_lg_k];
                bit_matrix::or_matrix_into(&mut smaller, new_lg_k, matrix, self.lg_k);
                self.state = UnionState::Matrix(smaller);
            }
            UnionState::Accumulator(acc) => {
                let mut replacement = CpcSketch::with_lg_k_and_seed(new_lg_k, self.seed)
                    .expect("new_lg_k already validated by the caller's sketch");
                if let Some(table) = acc.pair_table() {
                    walk_table_updating_sketch(&mut replacement, table);
                }
                self.state = if replacement.flavor() > Flavor::Sparse {
                    let surprises = replacement.pair_table().map(|t| t.unwrap()).unwrap_or_default();
                    let matrix = bit_matrix::bit_matrix_of_sketch(
                        replacement.lg_k(),
                        replacement.window_offset(),
                        replacement.sliding_window(),
                        surprises.into_iter(),
                    );
                    UnionState::Matrix(matrix)
                } else {
                    UnionState::Accumulator(replacement)
                };
            }
        }
        self.lg_k = new_lg_k;
    }

    /// One-way transition from holding a live accumulator sketch to holding
    /// a raw bit matrix. A no-op if already graduated.
    fn graduate(&mut self) {
        if let UnionState::Accumulator(acc) = &self.state {
            let surprises = acc.pair_table().map(|table| table.unwrap()).unwrap_or_default();
            let matrix = bit_matrix::bit_matrix_of_sketch(
                acc.lg_k(),
                acc.window_offset(),
                acc.sliding_window(),
                surprises.into_iter(),
            );
            self.state = UnionState::Matrix(matrix);
        }
    }

    /// Produces a snapshot sketch representing everything folded in so far.
    ///
    /// A matrix-backed union always returns a `mergeFlag`-set sketch: HIP
    /// estimation requires a continuous per-update history that a matrix
    /// cannot reconstruct, so its estimates fall back to the ICON
    /// estimator. An accumulator-backed union (nothing folded in yet ever
    /// outgrew Sparse) can still return a live HIP-tracking sketch.
    pub fn to_sketch(&self) -> CpcSketch {
        match &self.state {
            UnionState::Accumulator(acc) => acc.clone(),
            UnionState::Matrix(matrix) => CpcSketch::from_bit_matrix(self.lg_k, self.seed, matrix),
        }
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }
}

/// Replays every pair in `table` into `dest`, in a fixed-stride walk over
/// the table's raw slot array (including empty slots) rather than in
/// insertion order, so the destination fills up in a decorrelated order
/// regardless of how the source table was built.
fn walk_table_updating_sketch(dest: &mut CpcSketch, table: &PairTable) {
    let slots = table.raw_slots();
    let num_slots = slots.len();
    if num_slots == 0 {
        return;
    }
    let mut stride = (num_slots as f64 * INVERSE_GOLDEN).round() as usize;
    if stride % 2 == 0 {
        stride += 1;
    }
    let row_col_mask = (((1u32 << dest.lg_k()) - 1) << 6) | 63;
    let mut i = 0usize;
    for _ in 0..num_slots {
        let slot = slots[i];
        if slot != -1 {
            dest.row_col_update((slot as u32) & row_col_mask);
        }
        i = (i + stride) % num_slots;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NumStdDev;
    use crate::error::ErrorKind;

    #[test]
    fn union_of_disjoint_sketches_estimates_the_total() {
        let mut a = CpcSketch::with_lg_k(11).unwrap();
        let mut b = CpcSketch::with_lg_k(11).unwrap();
        for i in 0..5000u64 {
            a.update(i);
        }
        for i in 5000..10_000u64 {
            b.update(i);
        }

        let mut union = CpcUnion::new(11).unwrap();
        union.update(&a).unwrap();
        union.update(&b).unwrap();
        let result = union.to_sketch();

        let est = result.get_estimate();
        assert!(est > 8000.0 && est < 12_000.0, "estimate was {est}");
        assert!(result.get_lower_bound(NumStdDev::Two) <= est);
        assert!(result.get_upper_bound(NumStdDev::Two) >= est);
    }

    #[test]
    fn union_of_overlapping_sketches_does_not_double_count() {
        let mut a = CpcSketch::with_lg_k(11).unwrap();
        let mut b = CpcSketch::with_lg_k(11).unwrap();
        for i in 0..5000u64 {
            a.update(i);
            b.update(i);
        }

        let mut union = CpcUnion::new(11).unwrap();
        union.update(&a).unwrap();
        union.update(&b).unwrap();
        let est = union.to_sketch().get_estimate();
        assert!(est > 3500.0 && est < 7000.0, "estimate was {est}");
    }

    #[test]
    fn seed_mismatch_is_rejected() {
        let mut union = CpcUnion::new(10).unwrap();
        let mut other = CpcSketch::with_lg_k_and_seed(10, 1234).unwrap();
        other.update(1u64);
        assert_eq!(union.update(&other).unwrap_err().kind(), ErrorKind::SeedHashMismatch);
    }

    #[test]
    fn source_with_smaller_lg_k_downsamples_the_union() {
        let mut union = CpcUnion::new(12).unwrap();
        let mut big = CpcSketch::with_lg_k(12).unwrap();
        for i in 0..2000u64 {
            big.update(i);
        }
        union.update(&big).unwrap();

        let mut small = CpcSketch::with_lg_k(8).unwrap();
        small.update(1u64);
        union.update(&small).unwrap();

        assert_eq!(union.lg_k(), 8);
        let est = union.to_sketch().get_estimate();
        assert!(est > 1000.0 && est < 4000.0, "estimate was {est}");
    }

    #[test]
    fn downsample_then_more_updates_keeps_accumulating() {
        let mut union = CpcUnion::new(12).unwrap();
        let mut small = CpcSketch::with_lg_k(8).unwrap();
        for i in 0..50u64 {
            small.update(i);
        }
        union.update(&small).unwrap();
        assert_eq!(union.lg_k(), 8);

        let mut more = CpcSketch::with_lg_k(8).unwrap();
        for i in 50..100u64 {
            more.update(i);
        }
        union.update(&more).unwrap();

        let est = union.to_sketch().get_estimate();
        assert!(est > 50.0 && est < 200.0, "estimate was {est}");
    }

    #[test]
    fn union_graduates_to_a_matrix_once_a_source_outgrows_sparse() {
        let mut union = CpcUnion::new(11).unwrap();
        let mut big = CpcSketch::with_lg_k(11).unwrap();
        for i in 0..20_000u64 {
            big.update(i);
        }
        union.update(&big).unwrap();
        assert!(matches!(union.state, UnionState::Matrix(_)));
        let est = union.to_sketch().get_estimate();
        assert!(est > 15_000.0 && est < 25_000.0, "estimate was {est}");
    }

    #[test]
    fn empty_union_produces_empty_sketch() {
        let union = CpcUnion::new(10).unwrap();
        assert!(union.to_sketch().is_empty());
    }
}
