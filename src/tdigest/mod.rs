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

//! t-digest: a quantiles sketch specialized for `f64`, favoring accuracy in
//! the tails of the distribution over the reference implementations'
//! typical mid-distribution focus.
//!
//! Updates land in an unsorted buffer; once the buffer fills, it is
//! compressed into a bounded set of weighted centroids using the `K_2`
//! scale function, which allots more, smaller centroids near the
//! distribution's extremes and fewer, larger ones near the median.

mod iter;
mod serialization;
mod sketch;

pub use iter::TDigestIntoIter;
pub(crate) use sketch::Centroid;
pub use sketch::TDigest;
