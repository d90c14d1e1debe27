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

//! Small utilities shared across sketch implementations: a confidence-bound
//! selector, a non-cryptographic PRNG, and a couple of bit-twiddling
//! helpers used by the CPC estimator math.

/// The number of standard deviations used to compute a confidence interval
/// around an estimate.
///
/// `kappa` below is the value used to index the error-constant tables in
/// [`crate::cpc::confidence`]: `One` = 1, `Two` = 2, `Three` = 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumStdDev {
    One,
    Two,
    Three,
}

impl NumStdDev {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            NumStdDev::One => 1,
            NumStdDev::Two => 2,
            NumStdDev::Three => 3,
        }
    }
}

/// A source of pseudo-random 64-bit values.
///
/// Sketches use this only to break ties and choose coupons; it is never
/// part of any serialized state, so any backing generator is fine as long
/// as it is fast and reasonably well distributed.
pub(crate) trait RandomSource {
    fn next_u64(&mut self) -> u64;

    fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

/// A xorshift64* generator. Not cryptographically secure; chosen for speed.
pub(crate) struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn seeded(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
        }
    }
}

impl Default for XorShift64 {
    fn default() -> Self {
        let pid = std::process::id() as u64;
        let time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::seeded(time ^ (pid << 32))
    }
}

impl RandomSource for XorShift64 {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }
}

/// Number of trailing zero bits, as an `i32`, matching the sign used
/// throughout the CPC row/column arithmetic.
pub(crate) fn count_trailing_zeros_64(value: u64) -> i32 {
    value.trailing_zeros() as i32
}

/// `floor(log2(n))` for `n >= 1`.
pub(crate) fn floor_log2_of_u64(n: u64) -> u32 {
    debug_assert!(n >= 1);
    63 - n.leading_zeros()
}
