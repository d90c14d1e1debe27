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

//! Compressed Probabilistic Counting: a compact, mergeable cardinality
//! estimator with a bit-exact compressed wire format.

mod bit_matrix;
mod compression;
mod compression_tables;
mod confidence;
mod estimator;
mod pair_table;
mod serialization;
mod sketch;
mod union;
mod wrapper;

pub use sketch::{CpcSketch, Hashable};
pub use union::CpcUnion;
pub use wrapper::CpcWrapper;

/// Minimum supported `lgK`.
pub const MIN_LG_K: u8 = 4;
/// Maximum supported `lgK`.
pub const MAX_LG_K: u8 = 26;
/// The `lgK` used by [`CpcSketch::new`] and [`CpcSketch::default`].
pub const DEFAULT_LG_K: u8 = 11;

/// The operating mode of a [`CpcSketch`], derived from `lgK` and the current
/// coupon count. See the module invariants in [`CpcSketch`] for the exact
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Flavor {
    Empty,
    Sparse,
    Hybrid,
    Pinned,
    Sliding,
}

impl Flavor {
    /// Determines the flavor for a given `(lgK, numCoupons)` pair.
    pub(crate) fn determine(lg_k: u8, num_coupons: u64) -> Flavor {
        let k = 1u64 << lg_k;
        if num_coupons == 0 {
            Flavor::Empty
        } else if 32 * num_coupons < 3 * k {
            Flavor::Sparse
        } else if 2 * num_coupons < k {
            Flavor::Hybrid
        } else if 8 * num_coupons < 27 * k {
            Flavor::Pinned
        } else {
            Flavor::Sliding
        }
    }

    /// The `srcFlavor - 1` term used in the union's state-dispatch formula
    /// (`Empty` never reaches that code path).
    pub(crate) fn ordinal_minus_one(self) -> u8 {
        match self {
            Flavor::Empty => 0,
            Flavor::Sparse => 0,
            Flavor::Hybrid => 1,
            Flavor::Pinned => 2,
            Flavor::Sliding => 3,
        }
    }
}
