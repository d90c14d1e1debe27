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

//! A 128-bit non-cryptographic hash adapter used by the CPC sketch.
//!
//! Backed by [`mur3::murmurhash3_x64_128`]. `mur3`'s public signature only
//! accepts a 32-bit seed, so a 64-bit sketch seed cannot be passed through
//! directly; folding it into 32 bits by XORing its halves would make two
//! distinct seeds that happen to share that XOR indistinguishable. Instead
//! the seed's 8 little-endian bytes are hashed as a fixed prefix ahead of
//! the real input, with `mur3`'s own seed parameter pinned to `0` — the
//! seed still keys the digest, but both 64 bits of it participate.

/// The default seed used by CPC/KLL sketches when the caller does not
/// supply one explicitly.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Hashes `bytes` with the given 64-bit seed, producing a 128-bit digest as
/// two `u64` halves.
pub fn hash_bytes(bytes: &[u8], seed: u64) -> (u64, u64) {
    let mut keyed = Vec::with_capacity(8 + bytes.len());
    keyed.extend_from_slice(&seed.to_le_bytes());
    keyed.extend_from_slice(bytes);
    mur3::murmurhash3_x64_128(&keyed, 0)
}

/// Hashes a `u64` scalar via its 8-byte little-endian encoding.
pub fn hash_u64(value: u64, seed: u64) -> (u64, u64) {
    hash_bytes(&value.to_le_bytes(), seed)
}

/// Hashes an `i64` scalar via its 8-byte little-endian encoding.
pub fn hash_i64(value: i64, seed: u64) -> (u64, u64) {
    hash_bytes(&value.to_le_bytes(), seed)
}

/// Hashes a finite `f64` via its IEEE-754 little-endian bits.
///
/// `-0.0` and `+0.0` normalize to the same bit pattern so they hash
/// identically.
pub fn hash_f64(value: f64, seed: u64) -> (u64, u64) {
    let normalized = if value == 0.0 { 0.0 } else { value };
    hash_bytes(&normalized.to_le_bytes(), seed)
}

/// Hashes a slice of `i32` by concatenating each element's little-endian
/// encoding.
pub fn hash_i32_slice(values: &[i32], seed: u64) -> (u64, u64) {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    hash_bytes(&buf, seed)
}

/// Hashes a slice of `i64` by concatenating each element's little-endian
/// encoding.
pub fn hash_i64_slice(values: &[i64], seed: u64) -> (u64, u64) {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    hash_bytes(&buf, seed)
}

/// Hashes a UTF-8 string's raw bytes.
pub fn hash_str(value: &str, seed: u64) -> (u64, u64) {
    hash_bytes(value.as_bytes(), seed)
}

/// Computes the 16-bit seed hash embedded in a serialized sketch's
/// preamble: the low 16 bits of `hash_bytes(seed.to_le_bytes(), 0).0`.
pub fn seed_hash(seed: u64) -> u16 {
    let (h0, _) = hash_bytes(&seed.to_le_bytes(), 0);
    (h0 & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_zero_hash_equal() {
        let seed = DEFAULT_UPDATE_SEED;
        assert_eq!(hash_f64(0.0, seed), hash_f64(-0.0, seed));
    }

    #[test]
    fn deterministic() {
        let seed = DEFAULT_UPDATE_SEED;
        assert_eq!(hash_u64(42, seed), hash_u64(42, seed));
        assert_ne!(hash_u64(42, seed), hash_u64(43, seed));
    }

    #[test]
    fn different_seeds_diverge() {
        assert_ne!(hash_u64(42, 1), hash_u64(42, 2));
    }

    #[test]
    fn seed_hash_is_stable() {
        assert_eq!(seed_hash(DEFAULT_UPDATE_SEED), seed_hash(DEFAULT_UPDATE_SEED));
    }
}
