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

use crate::error::Error;

/// A single weighted cluster of nearby values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Centroid {
    pub mean: f64,
    pub weight: u64,
}

/// The `K_2` scale function: allots centroid capacity unevenly across the
/// rank domain so the tails of the distribution get more, smaller
/// centroids than the middle.
mod scale_function {
    pub fn k(q: f64, normalizer: f64) -> f64 {
        let q = q.clamp(1e-15, 1.0 - 1e-15);
        (q / (1.0 - q)).ln() * normalizer
    }

    pub fn q(k: f64, normalizer: f64) -> f64 {
        let exp_k = (k / normalizer).exp();
        exp_k / (1.0 + exp_k)
    }

    pub fn max(q: f64, normalizer: f64) -> f64 {
        q(k(q, normalizer) + 1.0, normalizer) - q
    }

    pub fn z(compression: f64, n: f64) -> f64 {
        4.0 * (n / compression).ln() + 24.0
    }

    pub fn normalizer(compression: f64, n: f64) -> f64 {
        compression / z(compression, n)
    }
}

const BUFFER_MULTIPLIER: usize = 5;
const MIN_K: usize = 10;
const MAX_K: usize = 1 << 16;

/// A t-digest: an approximate quantiles sketch that trades accuracy near
/// the median for accuracy in the tails.
///
/// Updates accumulate in an unsorted buffer. Once the buffer is full it is
/// merged into the sketch's bounded set of centroids, re-clustering the
/// whole set under the scale function so no centroid grows large enough to
/// blur the tails.
#[derive(Debug, Clone)]
pub struct TDigest {
    pub(super) k: usize,
    pub(super) reverse_merge: bool,
    pub(super) min: f64,
    pub(super) max: f64,
    pub(super) centroids: Vec<Centroid>,
    pub(super) centroids_weight: u64,
    pub(super) centroids_capacity: usize,
    pub(super) buffer: Vec<f64>,
}

impl TDigest {
    /// The scale parameter used when none is given explicitly.
    pub const DEFAULT_K: usize = 200;

    /// Creates an empty sketch with the given scale parameter.
    ///
    /// Larger `k` retains more centroids and therefore more accuracy, at
    /// the cost of more memory and a larger serialized image.
    pub fn new(k: usize) -> Result<Self, Error> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(Error::invalid_parameter(format!(
                "k must be in [{MIN_K}, {MAX_K}], got {k}"
            ))
            .with_context("k", k));
        }
        let centroids_capacity = 2 * k;
        Ok(Self {
            k,
            reverse_merge: false,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            centroids: Vec::with_capacity(centroids_capacity),
            centroids_weight: 0,
            centroids_capacity,
            buffer: Vec::with_capacity(BUFFER_MULTIPLIER * k),
        })
    }

    /// The scale parameter this sketch was built with.
    pub fn k(&self) -> usize {
        self.k
    }

    /// True if no items have been added.
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty() && self.buffer.is_empty()
    }

    /// Total number of updates folded into this sketch so far.
    pub fn total_weight(&self) -> u64 {
        self.centroids_weight + self.buffer.len() as u64
    }

    /// Smallest value seen, or `None` if the sketch is empty.
    pub fn min_value(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Largest value seen, or `None` if the sketch is empty.
    pub fn max_value(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Resets this sketch back to empty, keeping its scale parameter.
    pub fn reset(&mut self) {
        let k = self.k;
        *self = Self::new(k).expect("k was already validated by an earlier new()");
    }

    /// Adds a value to the sketch. NaN values are ignored.
    pub fn update(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        if self.is_empty() {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer.capacity() {
            self.compress();
        }
    }

    /// Folds any buffered updates into the centroid set.
    ///
    /// Called automatically once the buffer fills, and before any query or
    /// serialization, but exposed so callers can force it explicitly (e.g.
    /// before inspecting `centroid_count`).
    pub fn compress(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut incoming: Vec<Centroid> = self
            .buffer
            .drain(..)
            .map(|mean| Centroid { mean, weight: 1 })
            .collect();
        incoming.sort_by(|a, b| a.mean.partial_cmp(&b.mean).expect("buffered value is NaN-free"));
        let incoming_weight = incoming.len() as u64;
        self.do_merge(incoming, incoming_weight);
    }

    /// Number of centroids currently retained. Flushes the buffer first.
    pub fn centroid_count(&mut self) -> usize {
        self.compress();
        self.centroids.len()
    }

    fn do_merge(&mut self, mut incoming: Vec<Centroid>, incoming_weight: u64) {
        let sorted_descending = self.reverse_merge;
        incoming.extend(std::mem::take(&mut self.centroids));
        if sorted_descending {
            incoming.sort_by(|a, b| {
                b.mean
                    .partial_cmp(&a.mean)
                    .expect("centroid mean is NaN-free")
                    .then(b.weight.cmp(&a.weight))
            });
        } else {
            incoming.sort_by(|a, b| {
                a.mean
                    .partial_cmp(&b.mean)
                    .expect("centroid mean is NaN-free")
                    .then(a.weight.cmp(&b.weight))
            });
        }
        self.reverse_merge = !sorted_descending;

        let total_weight = self.centroids_weight + incoming_weight;
        let normalizer = scale_function::normalizer(self.k as f64, total_weight as f64);

        let mut merged: Vec<Centroid> = Vec::with_capacity(self.centroids_capacity);
        let mut iter = incoming.into_iter();
        let mut current = match iter.next() {
            Some(c) => c,
            None => return,
        };
        let mut weight_so_far = 0u64;

        for next in iter {
            let proposed_weight = current.weight + next.weight;
            let q0 = weight_so_far as f64 / total_weight as f64;
            let q2 = (weight_so_far + proposed_weight) as f64 / total_weight as f64;

            if (proposed_weight as f64) <= total_weight as f64 * scale_function::max(q0.max(q2), normalizer)
            {
                current.mean = (current.mean * current.weight as f64
                    + next.mean * next.weight as f64)
                    / proposed_weight as f64;
                current.weight = proposed_weight;
            } else {
                weight_so_far += current.weight;
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);

        if sorted_descending {
            merged.reverse();
        }

        if let Some(first) = merged.first() {
            self.min = self.min.min(first.mean);
        }
        if let Some(last) = merged.last() {
            self.max = self.max.max(last.mean);
        }

        self.centroids = merged;
        self.centroids_weight = total_weight;
    }

    /// Merges another sketch's data into this one.
    pub fn merge(&mut self, other: &TDigest) {
        if other.is_empty() {
            return;
        }
        let mut other = other.clone();
        other.compress();
        self.compress();

        let weight = other.centroids_weight;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.do_merge(other.centroids, weight);
    }

    /// Estimated value at the given rank in `[0.0, 1.0]`.
    pub fn get_quantile(&mut self, rank: f64) -> Result<f64, Error> {
        if !(0.0..=1.0).contains(&rank) || rank.is_nan() {
            return Err(Error::rank_out_of_range(rank));
        }
        if self.is_empty() {
            return Err(Error::empty_query("quantile queried on an empty TDigest"));
        }
        self.compress();

        if self.centroids.len() == 1 {
            return Ok(self.centroids[0].mean);
        }

        let total = self.centroids_weight as f64;
        let index = rank * total;

        if index < 1.0 {
            return Ok(self.min);
        }
        if index > total - 1.0 {
            return Ok(self.max);
        }

        let first = self.centroids[0];
        if first.weight > 1 && index < first.weight as f64 / 2.0 {
            let t = (index - 1.0) / (first.weight as f64 / 2.0 - 1.0);
            return Ok(self.min + t * (first.mean - self.min));
        }

        let last = self.centroids[self.centroids.len() - 1];
        if last.weight > 1 && (total - index) <= last.weight as f64 / 2.0 {
            let t = (total - index - 1.0) / (last.weight as f64 / 2.0 - 1.0);
            return Ok(self.max - t * (self.max - last.mean));
        }

        let mut weight_so_far = first.weight as f64 / 2.0;
        for window in self.centroids.windows(2) {
            let current = window[0];
            let next = window[1];
            let dw = (current.weight as f64 + next.weight as f64) / 2.0;
            if weight_so_far + dw > index {
                let t = (index - weight_so_far) / dw;
                return Ok(current.mean + t * (next.mean - current.mean));
            }
            weight_so_far += dw;
        }
        Ok(last.mean)
    }

    /// Estimated fraction of values less than (or equal to, with
    /// `inclusive`) `value`.
    pub fn get_rank(&mut self, value: f64) -> Result<f64, Error> {
        if value.is_nan() {
            return Err(Error::new(
                crate::error::ErrorKind::InvalidArgument,
                "rank value must not be NaN",
            ));
        }
        if self.is_empty() {
            return Err(Error::empty_query("rank queried on an empty TDigest"));
        }
        self.compress();

        if value < self.min {
            return Ok(0.0);
        }
        if value > self.max {
            return Ok(1.0);
        }

        let total = self.centroids_weight as f64;
        if total <= 0.0 {
            return Ok(0.0);
        }

        // Centroids that share an identical mean represent the same point
        // on the rank axis; collapsing them first keeps the interpolation
        // below strictly increasing in x (otherwise a zero-width bracket
        // at a repeated mean would short-circuit on whichever copy comes
        // first instead of centering on the whole flat region).
        let mut collapsed: Vec<Centroid> = Vec::with_capacity(self.centroids.len());
        for &c in &self.centroids {
            match collapsed.last_mut() {
                Some(last) if last.mean == c.mean => last.weight += c.weight,
                _ => collapsed.push(c),
            }
        }

        if collapsed.len() == 1 {
            return Ok(match value.partial_cmp(&collapsed[0].mean) {
                Some(std::cmp::Ordering::Less) => 0.0,
                Some(std::cmp::Ordering::Greater) => 1.0,
                _ => 0.5,
            });
        }

        let first = collapsed[0];
        if first.weight > 1 && value < first.mean {
            let half = first.weight as f64 / 2.0;
            let t = (value - self.min) / (first.mean - self.min);
            let index = 1.0 + t * (half - 1.0);
            return Ok((index / total).clamp(0.0, 1.0));
        }

        let last = collapsed[collapsed.len() - 1];
        if last.weight > 1 && value > last.mean {
            let half = last.weight as f64 / 2.0;
            let t = (value - last.mean) / (self.max - last.mean);
            let index = total - half + t * (half - 1.0);
            return Ok((index / total).clamp(0.0, 1.0));
        }

        let mut weight_so_far = first.weight as f64 / 2.0;
        for window in collapsed.windows(2) {
            let current = window[0];
            let next = window[1];
            if value <= next.mean {
                if value <= current.mean {
                    return Ok((weight_so_far / total).clamp(0.0, 1.0));
                }
                let dw = (current.weight as f64 + next.weight as f64) / 2.0;
                let t = (value - current.mean) / (next.mean - current.mean);
                return Ok(((weight_so_far + t * dw) / total).clamp(0.0, 1.0));
            }
            weight_so_far += (current.weight as f64 + next.weight as f64) / 2.0;
        }
        Ok(1.0)
    }
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(Self::DEFAULT_K).expect("DEFAULT_K is always in range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_k() {
        assert!(TDigest::new(1).is_err());
    }

    #[test]
    fn empty_sketch_rejects_queries() {
        let mut t = TDigest::default();
        assert!(t.get_quantile(0.5).is_err());
        assert!(t.get_rank(1.0).is_err());
    }

    #[test]
    fn rejects_rank_out_of_range() {
        let mut t = TDigest::default();
        t.update(1.0);
        assert!(t.get_quantile(1.5).is_err());
        assert!(t.get_quantile(-0.1).is_err());
    }

    #[test]
    fn nan_updates_are_ignored() {
        let mut t = TDigest::default();
        t.update(f64::NAN);
        assert!(t.is_empty());
    }

    #[test]
    fn single_value_is_its_own_quantile() {
        let mut t = TDigest::default();
        t.update(42.0);
        assert_eq!(t.get_quantile(0.0).unwrap(), 42.0);
        assert_eq!(t.get_quantile(0.5).unwrap(), 42.0);
        assert_eq!(t.get_quantile(1.0).unwrap(), 42.0);
    }

    #[test]
    fn quantiles_are_approximately_correct_on_a_uniform_stream() {
        let mut t = TDigest::new(200).unwrap();
        for i in 0..=1000 {
            t.update(i as f64);
        }
        let median = t.get_quantile(0.5).unwrap();
        assert!((median - 500.0).abs() < 15.0, "median was {median}");
        let p99 = t.get_quantile(0.99).unwrap();
        assert!((p99 - 990.0).abs() < 20.0, "p99 was {p99}");
    }

    #[test]
    fn rank_and_quantile_are_roughly_inverse() {
        let mut t = TDigest::new(200).unwrap();
        for i in 0..=1000 {
            t.update(i as f64);
        }
        let r = t.get_rank(500.0).unwrap();
        assert!((r - 0.5).abs() < 0.05, "rank was {r}");
    }

    #[test]
    fn rank_outside_observed_range_saturates() {
        let mut t = TDigest::default();
        for i in 0..100 {
            t.update(i as f64);
        }
        assert_eq!(t.get_rank(-1.0).unwrap(), 0.0);
        assert_eq!(t.get_rank(1000.0).unwrap(), 1.0);
    }

    #[test]
    fn merge_combines_two_disjoint_ranges() {
        let mut a = TDigest::new(200).unwrap();
        let mut b = TDigest::new(200).unwrap();
        for i in 0..500 {
            a.update(i as f64);
        }
        for i in 500..1000 {
            b.update(i as f64);
        }
        a.merge(&b);
        assert_eq!(a.min_value(), Some(0.0));
        assert_eq!(a.max_value(), Some(999.0));
        let median = a.get_quantile(0.5).unwrap();
        assert!((median - 500.0).abs() < 30.0, "median was {median}");
    }

    #[test]
    fn merge_with_empty_other_is_a_no_op() {
        let mut a = TDigest::default();
        a.update(1.0);
        a.update(2.0);
        let b = TDigest::default();
        a.merge(&b);
        assert_eq!(a.total_weight(), 2);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut t = TDigest::new(150).unwrap();
        t.update(1.0);
        t.update(2.0);
        t.reset();
        assert!(t.is_empty());
        assert_eq!(t.k(), 150);
    }
}
