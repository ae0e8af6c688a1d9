//! Downsampling
//!
//! Pure functions that reduce dense second-resolution price series to
//! chart-sized series by grouping samples into fixed-width buckets.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::market::PriceSample;

/// Default number of points a chart wants to render.
pub const DEFAULT_TARGET_POINTS: u32 = 120;

// =============================================================================
// Bucket Width
// =============================================================================

/// Supported chart resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BucketWidth {
    /// 5 minutes.
    FiveMinutes,
    /// 15 minutes.
    FifteenMinutes,
    /// 1 hour.
    OneHour,
    /// 4 hours.
    FourHours,
    /// 1 day.
    OneDay,
}

impl BucketWidth {
    /// All widths, ascending.
    pub const ALL: [Self; 5] = [
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Width in seconds.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        match self {
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    /// Short interval label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BucketWidth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Unrecognized interval label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported interval '{0}', expected one of 5m, 15m, 1h, 4h, 1d")]
pub struct BucketWidthError(String);

impl FromStr for BucketWidth {
    type Err = BucketWidthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5m" | "300" => Ok(Self::FiveMinutes),
            "15m" | "900" => Ok(Self::FifteenMinutes),
            "1h" | "60m" | "3600" => Ok(Self::OneHour),
            "4h" | "14400" => Ok(Self::FourHours),
            "1d" | "24h" | "86400" => Ok(Self::OneDay),
            _ => Err(BucketWidthError(s.to_string())),
        }
    }
}

/// Pick the smallest width that keeps `span_seconds` near `target_points`.
///
/// Returns the first width ≥ `ceil(span / target)`, or the largest width if
/// none is wide enough.
#[must_use]
pub fn suggested_bucket_width(span_seconds: i64, target_points: u32) -> BucketWidth {
    let target = i64::from(target_points.max(1));
    let span = span_seconds.max(0);
    let needed = span / target + i64::from(span % target != 0);

    BucketWidth::ALL
        .into_iter()
        .find(|w| w.seconds() >= needed)
        .unwrap_or(BucketWidth::OneDay)
}

// =============================================================================
// Chart Bucket
// =============================================================================

/// Aggregate of one bucket, stamped at its floor timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartBucket {
    /// Bucket floor, `floor(ts / width) * width`.
    pub timestamp: i64,
    /// Arithmetic mean of the bucket's prices.
    pub avg: f64,
    /// Lowest price.
    pub min: f64,
    /// Highest price.
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: u32,
    min: f64,
    max: f64,
}

impl Accumulator {
    const fn new(price: f64) -> Self {
        Self {
            sum: price,
            count: 1,
            min: price,
            max: price,
        }
    }

    fn push(&mut self, price: f64) {
        self.sum += price;
        self.count += 1;
        self.min = self.min.min(price);
        self.max = self.max.max(price);
    }

    fn bucket(self, timestamp: i64) -> ChartBucket {
        // Clamp so float rounding in the mean never escapes [min, max].
        let avg = (self.sum / f64::from(self.count)).clamp(self.min, self.max);
        ChartBucket {
            timestamp,
            avg,
            min: self.min,
            max: self.max,
        }
    }
}

const fn bucket_floor(timestamp: i64, width: i64) -> i64 {
    timestamp.div_euclid(width) * width
}

/// Single pass over time-ordered points; a bucket closes as soon as the
/// first point past it arrives.
fn group(points: &[PriceSample], width_seconds: i64) -> Vec<(i64, Accumulator)> {
    let width = width_seconds.max(1);
    let ordered: Cow<'_, [PriceSample]> = if points.is_sorted_by_key(|p| p.timestamp) {
        Cow::Borrowed(points)
    } else {
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|p| p.timestamp);
        Cow::Owned(sorted)
    };

    let mut buckets = Vec::new();
    let mut current: Option<(i64, Accumulator)> = None;

    for point in ordered.iter() {
        let floor = bucket_floor(point.timestamp, width);
        match &mut current {
            Some((open, acc)) if *open == floor => acc.push(point.price),
            _ => {
                if let Some(closed) = current.replace((floor, Accumulator::new(point.price))) {
                    buckets.push(closed);
                }
            }
        }
    }
    buckets.extend(current);

    buckets
}

// =============================================================================
// Operations
// =============================================================================

/// Reduce a series to one averaged point per bucket.
///
/// Inputs with two or fewer points are returned unchanged. Output is
/// ascending by bucket timestamp regardless of input order.
#[must_use]
pub fn downsample(points: &[PriceSample], width_seconds: i64) -> Vec<PriceSample> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    group(points, width_seconds)
        .into_iter()
        .map(|(timestamp, acc)| {
            let bucket = acc.bucket(timestamp);
            PriceSample {
                timestamp,
                price: bucket.avg,
            }
        })
        .collect()
}

/// Group a series into buckets carrying avg/min/max.
#[must_use]
pub fn bucketize(points: &[PriceSample], width_seconds: i64) -> Vec<ChartBucket> {
    group(points, width_seconds)
        .into_iter()
        .map(|(timestamp, acc)| acc.bucket(timestamp))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn sample(timestamp: i64, price: f64) -> PriceSample {
        PriceSample { timestamp, price }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(downsample(&[], 300).is_empty());
        assert!(bucketize(&[], 300).is_empty());
    }

    #[test]
    fn two_points_are_unchanged() {
        let points = vec![sample(10, 1.0), sample(20, 2.0)];
        assert_eq!(downsample(&points, 300), points);
    }

    #[test]
    fn averages_within_bucket() {
        let points = vec![
            sample(0, 10.0),
            sample(100, 20.0),
            sample(299, 30.0),
            sample(300, 40.0),
        ];

        let out = downsample(&points, 300);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp, 0);
        assert!((out[0].price - 20.0).abs() < 1e-9);
        assert_eq!(out[1].timestamp, 300);
        assert!((out[1].price - 40.0).abs() < 1e-9);
    }

    #[test]
    fn unsorted_input_is_sorted() {
        let points = vec![sample(900, 3.0), sample(0, 1.0), sample(400, 2.0)];

        let out = downsample(&points, 300);
        let stamps: Vec<i64> = out.iter().map(|p| p.timestamp).collect();

        assert_eq!(stamps, vec![0, 300, 900]);
    }

    #[test]
    fn pre_epoch_points_floor_downwards() {
        let points = vec![sample(-1, 1.0), sample(0, 2.0), sample(299, 4.0)];

        let buckets = bucketize(&points, 300);
        let stamps: Vec<i64> = buckets.iter().map(|b| b.timestamp).collect();

        assert_eq!(stamps, vec![-300, 0]);
    }

    #[test]
    fn bucketize_tracks_extremes() {
        let points = vec![sample(3_600, 5.0), sample(3_700, 1.0), sample(7_000, 9.0)];

        let buckets = bucketize(&points, 3_600);

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, 3_600);
        assert!((buckets[0].min - 1.0).abs() < f64::EPSILON);
        assert!((buckets[0].max - 9.0).abs() < f64::EPSILON);
        assert!((buckets[0].avg - 5.0).abs() < 1e-9);
    }

    #[test_case(0, BucketWidth::FiveMinutes ; "zero span")]
    #[test_case(3_600, BucketWidth::FiveMinutes ; "one hour")]
    #[test_case(86_400, BucketWidth::FifteenMinutes ; "one day")]
    #[test_case(3 * 86_400, BucketWidth::OneHour ; "three days")]
    #[test_case(7 * 86_400, BucketWidth::FourHours ; "one week")]
    #[test_case(30 * 86_400, BucketWidth::OneDay ; "thirty days")]
    #[test_case(365 * 86_400, BucketWidth::OneDay ; "one year")]
    #[test_case(10 * 365 * 86_400, BucketWidth::OneDay ; "beyond largest")]
    #[test_case(120 * 300, BucketWidth::FiveMinutes ; "exactly target five minute buckets")]
    #[test_case(120 * 300 + 1, BucketWidth::FifteenMinutes ; "just past five minute boundary")]
    fn suggested_width(span: i64, expected: BucketWidth) {
        assert_eq!(suggested_bucket_width(span, DEFAULT_TARGET_POINTS), expected);
    }

    #[test_case("5m", BucketWidth::FiveMinutes)]
    #[test_case("15M", BucketWidth::FifteenMinutes)]
    #[test_case("1h", BucketWidth::OneHour)]
    #[test_case(" 4h ", BucketWidth::FourHours)]
    #[test_case("1d", BucketWidth::OneDay)]
    fn interval_labels_parse(raw: &str, expected: BucketWidth) {
        assert_eq!(raw.parse::<BucketWidth>().unwrap(), expected);
    }

    #[test]
    fn unknown_interval_rejected() {
        assert!("7m".parse::<BucketWidth>().is_err());
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    fn series() -> impl Strategy<Value = Vec<PriceSample>> {
        prop::collection::vec(
            (0i64..200_000, 0.01f64..100_000.0).prop_map(|(t, p)| sample(t, p)),
            0..200,
        )
    }

    fn width() -> impl Strategy<Value = i64> {
        prop::sample::select(BucketWidth::ALL.iter().map(|w| w.seconds()).collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn downsample_respects_point_bound(points in series(), w in width()) {
            let out = downsample(&points, w);

            if points.len() <= 2 {
                prop_assert_eq!(out, points);
            } else {
                let min = points.iter().map(|p| p.timestamp).min().unwrap_or(0);
                let max = points.iter().map(|p| p.timestamp).max().unwrap_or(0);
                let span = max - min;
                let bound = (span + w - 1) / w + 1;
                prop_assert!(i64::try_from(out.len()).unwrap() <= bound);
                prop_assert!(out.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
            }
        }

        #[test]
        fn bucketize_matches_naive_reference(points in series(), w in width()) {
            let buckets = bucketize(&points, w);

            for bucket in &buckets {
                let members: Vec<f64> = points
                    .iter()
                    .filter(|p| p.timestamp.div_euclid(w) * w == bucket.timestamp)
                    .map(|p| p.price)
                    .collect();
                prop_assert!(!members.is_empty());

                let min = members.iter().copied().fold(f64::INFINITY, f64::min);
                let max = members.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                #[allow(clippy::cast_precision_loss)]
                let avg = members.iter().sum::<f64>() / members.len() as f64;

                prop_assert!(bucket.min <= bucket.avg && bucket.avg <= bucket.max);
                prop_assert!((bucket.min - min).abs() < f64::EPSILON);
                prop_assert!((bucket.max - max).abs() < f64::EPSILON);
                prop_assert!((bucket.avg - avg).abs() <= 1e-6 * avg.abs().max(1.0));
            }

            let distinct: std::collections::BTreeSet<i64> =
                points.iter().map(|p| p.timestamp.div_euclid(w) * w).collect();
            prop_assert_eq!(buckets.len(), distinct.len());
        }
    }
}
