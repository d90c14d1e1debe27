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

//! Preamble-based wire format for [`CpcSketch`].
//!
//! The first 8 bytes are common to every image: `preInts`, `serVer` (always
//! `1`), the family id, `lgK`, `fiCol`, a flags byte, and the 16-bit
//! `seedHash`. The flags byte carries three independent bits — `hipFlag`
//! (this image carries live HIP state), `supValFlag` (a surprise-value
//! stream follows), `windowFlag` (a sliding-window stream follows) — plus a
//! `compressed` bit that is always set (an uncompressed image is rejected on
//! read rather than misparsed). Those three bits select one of 8 format
//! variants, each with its own `preInts` count and field layout; `windowOffset`
//! is never stored, since it is always exactly [`super::sketch::target_window_offset`]
//! of the stored `(lgK, numCoupons)`.

use crate::codec::{Family, SketchBytes, SketchSlice};
use crate::cpc::compression;
use crate::cpc::pair_table::PairTable;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::{Flavor, MAX_LG_K, MIN_LG_K};
use crate::error::Error;
use crate::hash;

const FLAG_COMPRESSED: u8 = 0x04;
const FLAG_HIP: u8 = 0x08;
const FLAG_SUP_VAL: u8 = 0x10;
const FLAG_WINDOW: u8 = 0x20;

/// `preInts` for each `(windowFlag, supValFlag, hipFlag)` combination. Empty
/// images (`!windowFlag && !supValFlag`) are handled separately.
fn expected_pre_ints(window_flag: bool, sup_val_flag: bool, hip_flag: bool) -> u8 {
    match (window_flag, sup_val_flag, hip_flag) {
        (false, false, false) => 2, // EmptyMerged
        (false, false, true) => 2,  // EmptyHip
        (false, true, false) => 4,  // SparseHybridMerged
        (false, true, true) => 8,   // SparseHybridHip
        (true, false, false) => 4,  // PinnedSlidingMergedNosv
        (true, false, true) => 8,   // PinnedSlidingHipNosv
        (true, true, false) => 6,   // PinnedSlidingMerged
        (true, true, true) => 10,   // PinnedSlidingHip
    }
}

fn write_common_header(
    out: &mut SketchBytes,
    pre_ints: u8,
    lg_k: u8,
    fi_col: u8,
    window_flag: bool,
    sup_val_flag: bool,
    hip_flag: bool,
    seed: u64,
) {
    let mut flags = FLAG_COMPRESSED;
    if hip_flag {
        flags |= FLAG_HIP;
    }
    if sup_val_flag {
        flags |= FLAG_SUP_VAL;
    }
    if window_flag {
        flags |= FLAG_WINDOW;
    }
    out.write_u8(pre_ints);
    out.write_u8(1); // serVer
    out.write_u8(Family::CPC.id);
    out.write_u8(lg_k);
    out.write_u8(fi_col);
    out.write_u8(flags);
    out.write_u16_le(hash::seed_hash(seed));
}

pub(super) fn serialize(sketch: &CpcSketch) -> Vec<u8> {
    let flavor = sketch.flavor();
    let hip_flag = !sketch.merge_flag();
    let lg_k = sketch.lg_k();
    let fi_col = sketch.first_interesting_column();

    if flavor == Flavor::Empty {
        let mut out = SketchBytes::with_capacity(8);
        write_common_header(&mut out, 2, lg_k, fi_col, false, false, hip_flag, sketch.seed());
        return out.into_bytes();
    }

    let table_pairs: Vec<u32> = sketch.pair_table().map(|t| t.unwrap()).unwrap_or_default();
    let num_coupons = sketch.num_coupons();
    let window_flag = matches!(flavor, Flavor::Pinned | Flavor::Sliding);
    let sup_val_flag = !window_flag || !table_pairs.is_empty();
    let pre_ints = expected_pre_ints(window_flag, sup_val_flag, hip_flag);

    let mut out = SketchBytes::with_capacity(4 * pre_ints as usize + 256);
    write_common_header(&mut out, pre_ints, lg_k, fi_col, window_flag, sup_val_flag, hip_flag, sketch.seed());

    out.write_u32_le(num_coupons as u32);

    if !window_flag {
        // SparseHybridMerged / SparseHybridHip: a single merged pair stream
        // carries every coupon; numSV equals numCoupons and is not stored
        // separately.
        let streams = match flavor {
            Flavor::Sparse => compression::compress_sparse(lg_k, table_pairs),
            Flavor::Hybrid => {
                let window = sketch.sliding_window().expect("hybrid sketches always carry a window");
                compression::compress_hybrid(lg_k, window, table_pairs, num_coupons)
            }
            _ => unreachable!(),
        };
        out.write_u32_le(streams.csv.len() as u32);
        if hip_flag {
            out.write_f64_le(sketch.kxp());
            out.write_f64_le(sketch.hip_est_accum());
        }
        for word in &streams.csv {
            out.write_u32_le(*word);
        }
        return out.into_bytes();
    }

    let window = sketch.sliding_window().expect("windowed sketches always carry a window");
    let window_offset = sketch.window_offset();

    if !sup_val_flag {
        // PinnedSlidingMergedNosv / PinnedSlidingHipNosv: window only, no
        // surprise-value stream.
        let cw = compression::compress_window_only(lg_k, window, num_coupons);
        out.write_u32_le(cw.len() as u32);
        if hip_flag {
            out.write_f64_le(sketch.kxp());
            out.write_f64_le(sketch.hip_est_accum());
        }
        for word in &cw {
            out.write_u32_le(*word);
        }
        return out.into_bytes();
    }

    // PinnedSlidingMerged / PinnedSlidingHip: both streams present.
    let num_sv = table_pairs.len() as u32;
    let streams = match flavor {
        Flavor::Pinned => compression::compress_pinned(lg_k, window, table_pairs, num_coupons),
        Flavor::Sliding => compression::compress_sliding(lg_k, window, table_pairs, num_coupons, window_offset),
        _ => unreachable!(),
    };
    out.write_u32_le(num_sv);
    out.write_u32_le(streams.csv.len() as u32);
    out.write_u32_le(streams.cw.len() as u32);
    if hip_flag {
        out.write_f64_le(sketch.kxp());
        out.write_f64_le(sketch.hip_est_accum());
    }
    for word in &streams.cw {
        out.write_u32_le(*word);
    }
    for word in &streams.csv {
        out.write_u32_le(*word);
    }
    out.into_bytes()
}

pub(super) fn deserialize(bytes: &[u8], seed: u64) -> Result<CpcSketch, Error> {
    if bytes.len() < 8 {
        return Err(Error::insufficient_data_of("cpc header", bytes.len()));
    }
    let mut cur = SketchSlice::new(bytes);

    let pre_ints = cur.read_u8().map_err(Error::insufficient_data)?;
    let ser_ver = cur.read_u8().map_err(Error::insufficient_data)?;
    if ser_ver != 1 {
        return Err(Error::unsupported_serial_version(1, ser_ver));
    }
    let family_id = cur.read_u8().map_err(Error::insufficient_data)?;
    Family::CPC.validate_id(family_id)?;

    let lg_k = cur.read_u8().map_err(Error::insufficient_data)?;
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        return Err(Error::deserial(format!("lgK {lg_k} out of range [{MIN_LG_K}, {MAX_LG_K}]")));
    }

    let fi_col = cur.read_u8().map_err(Error::insufficient_data)?;
    if fi_col > 63 {
        return Err(Error::deserial(format!("fiCol must be <= 63, got {fi_col}")));
    }

    let flags = cur.read_u8().map_err(Error::insufficient_data)?;
    if flags & FLAG_COMPRESSED == 0 {
        return Err(Error::deserial("only compressed images are supported"));
    }
    let hip_flag = flags & FLAG_HIP != 0;
    let sup_val_flag = flags & FLAG_SUP_VAL != 0;
    let window_flag = flags & FLAG_WINDOW != 0;

    let expected = expected_pre_ints(window_flag, sup_val_flag, hip_flag);
    if pre_ints != expected {
        return Err(Error::deserial(format!(
            "preInts {pre_ints} does not match the format implied by flags (expected {expected})"
        )));
    }

    let seed_hash_field = cur.read_u16_le().map_err(Error::insufficient_data)?;
    let expected_seed_hash = hash::seed_hash(seed);
    if seed_hash_field != expected_seed_hash {
        return Err(Error::seed_hash_mismatch(expected_seed_hash, seed_hash_field));
    }

    if !window_flag && !sup_val_flag {
        return Ok(CpcSketch::from_raw_parts(
            lg_k,
            seed,
            0,
            fi_col,
            !hip_flag,
            0,
            None,
            None,
            (1u64 << lg_k) as f64,
            0.0,
        ));
    }

    let num_coupons = cur.read_u32_le().map_err(Error::insufficient_data)? as u64;
    let window_offset = super::sketch::target_window_offset(lg_k, num_coupons);

    if !window_flag {
        let csv_len = cur.read_u32_le().map_err(Error::insufficient_data)? as usize;
        let (kxp, hip_est_accum) = read_hip_state(&mut cur, lg_k, hip_flag)?;
        let csv = read_words(&mut cur, csv_len)?;

        let flavor = Flavor::determine(lg_k, num_coupons);
        let (window, table_pairs) = match flavor {
            Flavor::Sparse => (None, compression::decompress_sparse(lg_k, &csv, num_coupons)),
            Flavor::Hybrid => {
                let (window, pairs) = compression::decompress_hybrid(lg_k, &csv, num_coupons);
                (Some(window), pairs)
            }
            _ => {
                return Err(Error::deserial(
                    "numCoupons/lgK imply a windowed flavor but the image has no window stream",
                ))
            }
        };
        return Ok(build_sketch(
            lg_k,
            seed,
            num_coupons,
            fi_col,
            !hip_flag,
            0,
            window,
            table_pairs,
            kxp,
            hip_est_accum,
        ));
    }

    if !sup_val_flag {
        let w_len = cur.read_u32_le().map_err(Error::insufficient_data)? as usize;
        let (kxp, hip_est_accum) = read_hip_state(&mut cur, lg_k, hip_flag)?;
        let cw = read_words(&mut cur, w_len)?;
        let k = 1usize << lg_k;
        let window = compression::uncompress_window_only(&cw, k, lg_k, num_coupons);
        return Ok(build_sketch(
            lg_k,
            seed,
            num_coupons,
            fi_col,
            !hip_flag,
            window_offset,
            Some(window),
            Vec::new(),
            kxp,
            hip_est_accum,
        ));
    }

    let num_sv = cur.read_u32_le().map_err(Error::insufficient_data)?;
    let csv_len = cur.read_u32_le().map_err(Error::insufficient_data)? as usize;
    let cw_len = cur.read_u32_le().map_err(Error::insufficient_data)? as usize;
    let (kxp, hip_est_accum) = read_hip_state(&mut cur, lg_k, hip_flag)?;
    let cw = read_words(&mut cur, cw_len)?;
    let csv = read_words(&mut cur, csv_len)?;

    let flavor = Flavor::determine(lg_k, num_coupons);
    let (window, table_pairs) = match flavor {
        Flavor::Pinned => compression::decompress_pinned(lg_k, &cw, &csv, num_coupons, num_sv as u64),
        Flavor::Sliding => {
            compression::decompress_sliding(lg_k, &cw, &csv, num_coupons, num_sv as u64, window_offset)
        }
        _ => {
            return Err(Error::deserial(
                "numCoupons/lgK imply a non-windowed flavor but the image has window and sv streams",
            ))
        }
    };
    Ok(build_sketch(
        lg_k,
        seed,
        num_coupons,
        fi_col,
        !hip_flag,
        window_offset,
        Some(window),
        table_pairs,
        kxp,
        hip_est_accum,
    ))
}

fn read_hip_state(cur: &mut SketchSlice, lg_k: u8, hip_flag: bool) -> Result<(f64, f64), Error> {
    if hip_flag {
        let kxp = cur.read_f64_le().map_err(Error::insufficient_data)?;
        let hip = cur.read_f64_le().map_err(Error::insufficient_data)?;
        Ok((kxp, hip))
    } else {
        Ok(((1u64 << lg_k) as f64, 0.0))
    }
}

fn read_words(cur: &mut SketchSlice, len: usize) -> Result<Vec<u32>, Error> {
    let mut words = Vec::with_capacity(len);
    for _ in 0..len {
        words.push(cur.read_u32_le().map_err(Error::insufficient_data)?);
    }
    Ok(words)
}

#[allow(clippy::too_many_arguments)]
fn build_sketch(
    lg_k: u8,
    seed: u64,
    num_coupons: u64,
    fi_col: u8,
    merge_flag: bool,
    window_offset: u8,
    window: Option<Vec<u8>>,
    table_pairs: Vec<u32>,
    kxp: f64,
    hip_est_accum: f64,
) -> CpcSketch {
    let pair_table = if table_pairs.is_empty() {
        None
    } else {
        let mut table = PairTable::new(2, 6 + lg_k);
        for pair in table_pairs {
            table.must_insert(pair);
        }
        Some(table)
    };
    CpcSketch::from_raw_parts(
        lg_k,
        seed,
        num_coupons,
        fi_col,
        merge_flag,
        window_offset,
        window,
        pair_table,
        kxp,
        hip_est_accum,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NumStdDev;

    #[test]
    fn round_trips_empty_sketch() {
        let sketch = CpcSketch::with_lg_k(10).unwrap();
        let bytes = sketch.serialize();
        let back = CpcSketch::from_bytes(&bytes).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.lg_k(), 10);
    }

    #[test]
    fn round_trips_sparse_sketch() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        for i in 0..50u64 {
            sketch.update(i);
        }
        let bytes = sketch.serialize();
        let back = CpcSketch::from_bytes(&bytes).unwrap();
        assert_eq!(back.get_estimate(), sketch.get_estimate());
    }

    #[test]
    fn round_trips_dense_sketch() {
        let mut sketch = CpcSketch::with_lg_k(8).unwrap();
        for i in 0..10_000u64 {
            sketch.update(i);
        }
        let bytes = sketch.serialize();
        let back = CpcSketch::from_bytes(&bytes).unwrap();
        let est = back.get_estimate();
        assert!(est > 0.0);
        let orig_est = sketch.get_estimate();
        assert!((est - orig_est).abs() / orig_est < 0.3, "est={est} orig={orig_est}");
    }

    #[test]
    fn wrong_seed_is_rejected() {
        let sketch = CpcSketch::with_lg_k(10).unwrap();
        let bytes = sketch.serialize();
        let err = CpcSketch::from_bytes_with_seed(&bytes, 555).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SeedHashMismatch);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        for i in 0..500u64 {
            sketch.update(i);
        }
        let mut bytes = sketch.serialize();
        bytes.truncate(bytes.len() - 4);
        assert!(CpcSketch::from_bytes(&bytes).is_err());
    }

    #[test]
    fn union_result_round_trips() {
        let mut a = CpcSketch::with_lg_k(9).unwrap();
        for i in 0..3000u64 {
            a.update(i);
        }
        let mut union = super::super::union::CpcUnion::new(9).unwrap();
        union.update(&a).unwrap();
        let result = union.to_sketch();
        let bytes = result.serialize();
        let back = CpcSketch::from_bytes(&bytes).unwrap();
        assert_eq!(back.get_lower_bound(NumStdDev::Two), result.get_lower_bound(NumStdDev::Two));
    }

    #[test]
    fn empty_image_byte_layout_matches_the_preamble_table() {
        let sketch = CpcSketch::with_lg_k_and_seed(10, hash::DEFAULT_UPDATE_SEED).unwrap();
        let bytes = sketch.serialize();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 2); // preInts
        assert_eq!(bytes[1], 1); // serVer
        assert_eq!(bytes[2], Family::CPC.id); // family
        assert_eq!(bytes[3], 10); // lgK
        assert_eq!(bytes[4], 0); // fiCol

        // Flip the HIP bit off to get the EmptyMerged encoding the preamble
        // table describes, and confirm it deserializes to the same empty
        // sketch regardless of which Empty variant was written.
        let mut merged_bytes = bytes.clone();
        merged_bytes[5] = FLAG_COMPRESSED;
        let back = CpcSketch::from_bytes_with_seed(&merged_bytes, hash::DEFAULT_UPDATE_SEED).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.get_estimate(), 0.0);
    }

    #[test]
    fn preints_mismatch_is_rejected() {
        let sketch = CpcSketch::with_lg_k(10).unwrap();
        let mut bytes = sketch.serialize();
        bytes[0] = 99;
        assert!(CpcSketch::from_bytes(&bytes).is_err());
    }
}
