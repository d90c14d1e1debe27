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

use super::sketch::Centroid;
use super::TDigest;

/// Consuming iterator over the values folded into a [`TDigest`].
///
/// Buffered (not yet compressed) values come out first and exactly as
/// given; compressed centroids come out as their mean, repeated `weight`
/// times, so the iterator's length always equals `total_weight()`.
pub struct TDigestIntoIter {
    buffer: std::vec::IntoIter<f64>,
    centroids: std::vec::IntoIter<Centroid>,
    current: Option<(f64, u64)>,
}

impl Iterator for TDigestIntoIter {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if let Some(value) = self.buffer.next() {
            return Some(value);
        }
        loop {
            if let Some((mean, remaining)) = self.current.take() {
                if remaining > 1 {
                    self.current = Some((mean, remaining - 1));
                }
                return Some(mean);
            }
            match self.centroids.next() {
                Some(c) => self.current = Some((c.mean, c.weight)),
                None => return None,
            }
        }
    }
}

impl IntoIterator for TDigest {
    type Item = f64;
    type IntoIter = TDigestIntoIter;

    fn into_iter(self) -> TDigestIntoIter {
        TDigestIntoIter {
            buffer: self.buffer.into_iter(),
            centroids: self.centroids.into_iter(),
            current: None,
        }
    }
}

impl FromIterator<f64> for TDigest {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut digest = TDigest::default();
        for value in iter {
            digest.update(value);
        }
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_iter_yields_every_update() {
        let mut t = TDigest::new(200).unwrap();
        for i in 0..50 {
            t.update(i as f64);
        }
        let collected: Vec<f64> = t.into_iter().collect();
        assert_eq!(collected.len(), 50);
    }

    #[test]
    fn from_iter_builds_an_equivalent_sketch() {
        let mut t: TDigest = (0..200).map(|i| i as f64).collect();
        assert_eq!(t.total_weight(), 200);
        let median = t.get_quantile(0.5).unwrap();
        assert!((median - 100.0).abs() < 15.0, "median was {median}");
    }
}
