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

//! Binary serialization format constants and routines for t-digest
//! sketches.

use super::sketch::Centroid;
use super::TDigest;
use crate::codec::{Family, SketchBytes, SketchSlice};
use crate::error::Error;

const SERIAL_VERSION: u8 = 1;
const PREAMBLE_INTS_SHORT: u8 = 1;
const PREAMBLE_INTS_FULL: u8 = 2;

const FLAG_EMPTY: u8 = 1 << 0;
const FLAG_SINGLE_VALUE: u8 = 1 << 1;
const FLAG_REVERSE_MERGE: u8 = 1 << 2;

impl TDigest {
    /// Serializes the sketch to bytes. Flushes any buffered updates first.
    pub fn serialize(&self) -> Vec<u8> {
        let mut digest = self.clone();
        digest.compress();

        let is_empty = digest.is_empty();
        let is_single_value = digest.centroids.len() == 1;

        let preamble_ints = if is_empty || is_single_value {
            PREAMBLE_INTS_SHORT
        } else {
            PREAMBLE_INTS_FULL
        };

        let size = digest.serialized_size(preamble_ints, is_empty, is_single_value);
        let mut bytes = SketchBytes::with_capacity(size);

        let flags = (if is_empty { FLAG_EMPTY } else { 0 })
            | (if is_single_value { FLAG_SINGLE_VALUE } else { 0 })
            | (if digest.reverse_merge {
                FLAG_REVERSE_MERGE
            } else {
                0
            });

        bytes.write_u8(preamble_ints);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(Family::TDIGEST.id);
        bytes.write_u8(flags);
        bytes.write_u32_le(digest.k as u32);

        if is_empty {
            return bytes.into_bytes();
        }

        if is_single_value {
            bytes.write_f64_le(digest.centroids[0].mean);
            return bytes.into_bytes();
        }

        bytes.write_f64_le(digest.min);
        bytes.write_f64_le(digest.max);
        bytes.write_u64_le(digest.centroids_weight);
        bytes.write_u32_le(digest.centroids.len() as u32);
        for c in &digest.centroids {
            bytes.write_f64_le(c.mean);
            bytes.write_u64_le(c.weight);
        }

        bytes.into_bytes()
    }

    fn serialized_size(&self, preamble_ints: u8, is_empty: bool, is_single_value: bool) -> usize {
        let header = 8usize;
        if is_empty {
            return header;
        }
        if is_single_value {
            return header + 8;
        }
        debug_assert_eq!(preamble_ints, PREAMBLE_INTS_FULL);
        header + 8 + 8 + 8 + 4 + self.centroids.len() * 16
    }

    /// Deserializes a sketch from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<TDigest, Error> {
        fn make_error(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |_| Error::insufficient_data(tag)
        }

        let mut cursor = SketchSlice::new(bytes);

        let preamble_ints = cursor.read_u8().map_err(make_error("preamble_ints"))?;
        let serial_version = cursor.read_u8().map_err(make_error("serial_version"))?;
        let family_id = cursor.read_u8().map_err(make_error("family_id"))?;
        let flags = cursor.read_u8().map_err(make_error("flags"))?;
        let k = cursor.read_u32_le().map_err(make_error("k"))?;

        Family::TDIGEST.validate_id(family_id)?;
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }

        let k = k as usize;
        let mut digest = TDigest::new(k)?;

        let is_empty = (flags & FLAG_EMPTY) != 0;
        let is_single_value = (flags & FLAG_SINGLE_VALUE) != 0;
        digest.reverse_merge = (flags & FLAG_REVERSE_MERGE) != 0;

        if is_empty {
            if preamble_ints != PREAMBLE_INTS_SHORT {
                return Err(Error::invalid_preamble_longs(
                    PREAMBLE_INTS_SHORT,
                    preamble_ints,
                ));
            }
            return Ok(digest);
        }

        if is_single_value {
            if preamble_ints != PREAMBLE_INTS_SHORT {
                return Err(Error::invalid_preamble_longs(
                    PREAMBLE_INTS_SHORT,
                    preamble_ints,
                ));
            }
            let value = cursor.read_f64_le().map_err(make_error("single value"))?;
            digest.min = value;
            digest.max = value;
            digest.centroids.push(Centroid {
                mean: value,
                weight: 1,
            });
            digest.centroids_weight = 1;
            return Ok(digest);
        }

        if preamble_ints != PREAMBLE_INTS_FULL {
            return Err(Error::invalid_preamble_longs(
                PREAMBLE_INTS_FULL,
                preamble_ints,
            ));
        }

        let min = cursor.read_f64_le().map_err(make_error("min"))?;
        let max = cursor.read_f64_le().map_err(make_error("max"))?;
        let centroids_weight = cursor.read_u64_le().map_err(make_error("centroids_weight"))?;
        let num_centroids = cursor.read_u32_le().map_err(make_error("num_centroids"))?;

        if min > max {
            return Err(Error::deserial(format!(
                "min ({min}) must not exceed max ({max})"
            )));
        }

        let mut centroids = Vec::with_capacity(num_centroids as usize);
        for _ in 0..num_centroids {
            let mean = cursor.read_f64_le().map_err(make_error("centroid mean"))?;
            let weight = cursor
                .read_u64_le()
                .map_err(make_error("centroid weight"))?;
            centroids.push(Centroid { mean, weight });
        }

        digest.min = min;
        digest.max = max;
        digest.centroids_weight = centroids_weight;
        digest.centroids = centroids;

        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_round_trips_an_empty_sketch() {
        let t = TDigest::new(150).unwrap();
        let bytes = t.serialize();
        let back = TDigest::deserialize(&bytes).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.k(), 150);
    }

    #[test]
    fn serialization_round_trips_a_single_value_sketch() {
        let mut t = TDigest::default();
        t.update(7.5);
        let bytes = t.serialize();
        let mut back = TDigest::deserialize(&bytes).unwrap();
        assert_eq!(back.get_quantile(0.5).unwrap(), 7.5);
    }

    #[test]
    fn serialization_round_trips_a_populated_sketch() {
        let mut t = TDigest::new(200).unwrap();
        for i in 0..2000 {
            t.update(i as f64);
        }
        let bytes = t.serialize();
        let mut back = TDigest::deserialize(&bytes).unwrap();
        assert_eq!(back.min_value(), t.min_value());
        assert_eq!(back.max_value(), t.max_value());
        assert_eq!(back.total_weight(), t.total_weight());
        let original_median = t.get_quantile(0.5).unwrap();
        let restored_median = back.get_quantile(0.5).unwrap();
        assert!((original_median - restored_median).abs() < 1e-9);
    }

    #[test]
    fn deserialize_rejects_wrong_family() {
        let mut t = TDigest::default();
        t.update(1.0);
        let mut bytes = t.serialize();
        bytes[2] = 99;
        assert!(TDigest::deserialize(&bytes).is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_input() {
        let mut t = TDigest::new(200).unwrap();
        for i in 0..500 {
            t.update(i as f64);
        }
        let bytes = t.serialize();
        assert!(TDigest::deserialize(&bytes[..bytes.len() - 4]).is_err());
    }
}
