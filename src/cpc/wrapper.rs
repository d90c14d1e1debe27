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

//! A lightweight, read-only view over a serialized [`CpcSketch`] image,
//! for callers that only need a handful of summary statistics and would
//! rather not reconstruct the full pair table and window.

use crate::cpc::sketch::CpcSketch;
use crate::codec::Family;
use crate::common::NumStdDev;
use crate::error::Error;
use crate::hash;

pub struct CpcWrapper {
    sketch: CpcSketch,
}

impl CpcWrapper {
    /// Parses a serialized CPC image, using the default hash seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_bytes_with_seed(bytes, hash::DEFAULT_UPDATE_SEED)
    }

    /// Like [`CpcWrapper::from_bytes`], but validates against a
    /// caller-chosen seed.
    pub fn from_bytes_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        let sketch = CpcSketch::from_bytes_with_seed(bytes, seed)?;
        Ok(Self { sketch })
    }

    pub fn get_lg_k(&self) -> u8 {
        self.sketch.lg_k()
    }

    pub fn get_estimate(&self) -> f64 {
        self.sketch.get_estimate()
    }

    pub fn get_lower_bound(&self, kappa: NumStdDev) -> f64 {
        self.sketch.get_lower_bound(kappa)
    }

    pub fn get_upper_bound(&self, kappa: NumStdDev) -> f64 {
        self.sketch.get_upper_bound(kappa)
    }

    pub fn get_family(&self) -> &'static Family {
        &Family::CPC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_a_serialized_sketch() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        for i in 0..2000u64 {
            sketch.update(i);
        }
        let bytes = sketch.serialize();
        let wrapper = CpcWrapper::from_bytes(&bytes).unwrap();
        assert_eq!(wrapper.get_lg_k(), 10);
        assert!((wrapper.get_estimate() - sketch.get_estimate()).abs() < 1e-9);
        assert_eq!(wrapper.get_family().id, Family::CPC.id);
    }

    #[test]
    fn rejects_an_uncompressed_image() {
        let mut sketch = CpcSketch::with_lg_k(10).unwrap();
        sketch.update(1u64);
        let mut bytes = sketch.serialize();
        bytes[5] &= !0x04; // clear the compressed flag bit
        let err = CpcWrapper::from_bytes(&bytes).unwrap_err();
        assert!(err.message().contains("only compressed images are supported"));
    }
}
