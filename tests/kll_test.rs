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

use datasketches::kll::KllSketch;
use datasketches::kll::DEFAULT_K;
use datasketches::kll::MAX_K;
use datasketches::kll::MIN_K;

fn assert_approx_eq(actual: f64, expected: f64, tolerance: f64) {
    let delta = (actual - expected).abs();
    assert!(
        delta <= tolerance,
        "expected {expected} +/- {tolerance}, got {actual}"
    );
}

fn rank_eps(sketch: &KllSketch<f32>) -> f64 {
    sketch.normalized_rank_error(false)
}

#[test]
fn k_limits_are_accepted() {
    assert!(KllSketch::<f32>::new(MIN_K).is_ok());
    assert!(KllSketch::<f32>::new(MAX_K).is_ok());
}

#[test]
fn k_too_small_is_rejected() {
    let err = KllSketch::<f32>::new(MIN_K - 1).unwrap_err();
    assert_eq!(err.kind(), datasketches::error::ErrorKind::InvalidParameter);
}

#[test]
fn empty_sketch_rejects_every_query() {
    let sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    assert!(sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.n(), 0);
    assert_eq!(sketch.num_retained(), 0);
    assert!(sketch.min_item().is_none());
    assert!(sketch.max_item().is_none());
    assert!(sketch.rank(&0.0, true).is_err());
    assert!(sketch.quantile(0.5, true).is_err());
    assert!(sketch.pmf(&[0.0f32], true).is_err());
    assert!(sketch.cdf(&[0.0f32], true).is_err());
}

#[test]
fn quantile_out_of_range_is_an_error() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(0.0);
    assert!(sketch.quantile(-1.0, true).is_err());
    assert!(sketch.quantile(1.1, true).is_err());
}

#[test]
fn single_item_sketch_reports_itself() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(1.0);
    assert!(!sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.n(), 1);
    assert_eq!(sketch.num_retained(), 1);
    assert_eq!(sketch.rank(&1.0, false).unwrap(), 0.0);
    assert_eq!(sketch.rank(&1.0, true).unwrap(), 1.0);
    assert_eq!(sketch.rank(&2.0, false).unwrap(), 1.0);
    assert_eq!(sketch.min_item().cloned(), Some(1.0));
    assert_eq!(sketch.max_item().cloned(), Some(1.0));
    assert_eq!(sketch.quantile(0.5, true).unwrap(), 1.0);
}

#[test]
fn nan_updates_are_ignored() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(f32::NAN);
    assert!(sketch.is_empty());
    sketch.update(0.0);
    sketch.update(f32::NAN);
    assert_eq!(sketch.n(), 1);
}

#[test]
fn exact_mode_ranks_and_quantiles_are_precise() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let n = DEFAULT_K as usize;
    for i in 1..=n {
        sketch.update(i as f32);
        assert_eq!(sketch.n(), i as u64);
    }
    assert!(!sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.num_retained(), n);
    assert_eq!(sketch.min_item().cloned(), Some(1.0));
    assert_eq!(sketch.quantile(0.0, true).unwrap(), 1.0);
    assert_eq!(sketch.max_item().cloned(), Some(n as f32));
    assert_eq!(sketch.quantile(1.0, true).unwrap(), n as f32);

    for i in 1..=n {
        let inclusive_rank = i as f64 / n as f64;
        assert_eq!(sketch.rank(&(i as f32), true).unwrap(), inclusive_rank);
        let exclusive_rank = (i - 1) as f64 / n as f64;
        assert_eq!(sketch.rank(&(i as f32), false).unwrap(), exclusive_rank);
    }
}

#[test]
fn estimation_mode_rank_error_is_bounded() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let n = 10_000;
    for i in 0..n {
        sketch.update(i as f32);
    }
    assert!(sketch.is_estimation_mode());
    assert_eq!(sketch.min_item().cloned(), Some(0.0));
    assert_eq!(sketch.max_item().cloned(), Some((n - 1) as f32));

    let eps = rank_eps(&sketch);
    for i in (0..n).step_by(10) {
        let true_rank = i as f64 / n as f64;
        let rank = sketch.rank(&(i as f32), false).unwrap();
        assert_approx_eq(rank, true_rank, eps);
    }
    assert!(sketch.num_retained() > 0);
}

#[test]
fn rank_cdf_and_pmf_agree() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let n = 200;
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
        sketch.update(i as f32);
        values.push(i as f32);
    }

    let ranks = sketch.cdf(&values, false).unwrap();
    let pmf = sketch.pmf(&values, false).unwrap();
    let mut subtotal = 0.0;
    for i in 0..n {
        let rank = sketch.rank(&values[i], false).unwrap();
        assert_eq!(rank, ranks[i]);
        subtotal += pmf[i];
        assert!((ranks[i] - subtotal).abs() <= 1e-6, "mismatch at {i}");
    }
}

#[test]
fn non_monotonic_split_points_are_rejected() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(0.0);
    assert!(sketch.cdf(&[1.0, 0.0], true).is_err());
}

#[test]
fn nan_split_point_is_rejected() {
    let mut sketch = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch.update(0.0);
    assert!(sketch.cdf(&[f32::NAN], true).is_err());
}

#[test]
fn merge_combines_two_streams() {
    let mut sketch1 = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let mut sketch2 = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let n = 10_000;
    for i in 0..n {
        sketch1.update(i as f32);
        sketch2.update((2 * n - i - 1) as f32);
    }

    sketch1.merge(&sketch2);

    assert!(!sketch1.is_empty());
    assert_eq!(sketch1.n(), (2 * n) as u64);
    assert_eq!(sketch1.min_item().cloned(), Some(0.0));
    assert_eq!(sketch1.max_item().cloned(), Some((2 * n - 1) as f32));
    let median = sketch1.quantile(0.5, true).unwrap();
    let eps = rank_eps(&sketch1);
    assert_approx_eq(median as f64, n as f64, n as f64 * eps);
}

#[test]
fn merge_min_max_pulled_from_other() {
    let mut sketch1 = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    let mut sketch2 = KllSketch::<f32>::new(DEFAULT_K).unwrap();
    sketch1.update(1.0);
    sketch2.update(2.0);
    sketch2.merge(&sketch1);
    assert_eq!(sketch2.min_item().cloned(), Some(1.0));
    assert_eq!(sketch2.max_item().cloned(), Some(2.0));
}

#[test]
fn scenario_string_items_feed_from_spec() {
    let mut sketch = KllSketch::<String>::new(DEFAULT_K).unwrap();
    for i in 1..=1000 {
        sketch.update(format!("{i:04}"));
    }
    let median = sketch.quantile(0.5, true).unwrap();
    let value: f64 = median.parse().unwrap();
    let lower = 500.0 * (1.0 - 0.013);
    let upper = 500.0 * (1.0 + 0.013);
    assert!(
        (lower..=upper).contains(&value),
        "median {value} outside [{lower}, {upper}]"
    );
}

#[test]
fn serialization_round_trips_through_bytes() {
    let mut sketch = KllSketch::<f64>::new(DEFAULT_K).unwrap();
    for i in 0..5_000 {
        sketch.update(i as f64);
    }
    let bytes = sketch.serialize();
    let restored = KllSketch::<f64>::deserialize(&bytes).unwrap();
    assert_eq!(restored.n(), sketch.n());
    assert_eq!(restored.min_item(), sketch.min_item());
    assert_eq!(restored.max_item(), sketch.max_item());
    assert_eq!(
        restored.quantile(0.5, true).unwrap(),
        sketch.quantile(0.5, true).unwrap()
    );
}
