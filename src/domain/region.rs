//! Latitude/longitude bounding boxes and their quadrant subdivision
//!
//! Boundary values are fixed-point decimals with 8 fractional digits,
//! rounded half-to-even. They are sent verbatim to the upstream source as
//! query parameters, so their string form must not drift between runs or
//! platforms.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use thiserror::Error;

/// Number of fractional digits kept for every boundary value
pub const COORD_SCALE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("min_lat {min} is greater than max_lat {max}")]
    InvertedLatitude { min: Decimal, max: Decimal },
    #[error("min_long {min} is greater than max_long {max}")]
    InvertedLongitude { min: Decimal, max: Decimal },
}

/// Round to `COORD_SCALE` digits (half-to-even) and pad to exactly that scale
#[inline]
pub fn quantize(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(COORD_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(COORD_SCALE);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    rounded
}

/// Format a coordinate with exactly 8 fractional digits and no grouping
pub fn format_coord(value: Decimal) -> String {
    quantize(value).to_string()
}

/// Immutable axis-aligned bounding box
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    min_lat: Decimal,
    max_lat: Decimal,
    min_long: Decimal,
    max_long: Decimal,
    mid_lat: Decimal,
    mid_long: Decimal,
}

impl Region {
    pub fn new(
        min_lat: Decimal,
        max_lat: Decimal,
        min_long: Decimal,
        max_long: Decimal,
    ) -> Result<Self, RegionError> {
        let (min_lat, max_lat) = (quantize(min_lat), quantize(max_lat));
        let (min_long, max_long) = (quantize(min_long), quantize(max_long));

        if min_lat > max_lat {
            return Err(RegionError::InvertedLatitude { min: min_lat, max: max_lat });
        }
        if min_long > max_long {
            return Err(RegionError::InvertedLongitude { min: min_long, max: max_long });
        }

        Ok(Self::from_ordered(min_lat, max_lat, min_long, max_long))
    }

    /// Bounds must already be quantized and ordered
    fn from_ordered(min_lat: Decimal, max_lat: Decimal, min_long: Decimal, max_long: Decimal) -> Self {
        Self {
            min_lat,
            max_lat,
            min_long,
            max_long,
            mid_lat: midpoint(min_lat, max_lat),
            mid_long: midpoint(min_long, max_long),
        }
    }

    pub fn min_lat(&self) -> Decimal {
        self.min_lat
    }

    pub fn max_lat(&self) -> Decimal {
        self.max_lat
    }

    pub fn min_long(&self) -> Decimal {
        self.min_long
    }

    pub fn max_long(&self) -> Decimal {
        self.max_long
    }

    pub fn mid_lat(&self) -> Decimal {
        self.mid_lat
    }

    pub fn mid_long(&self) -> Decimal {
        self.mid_long
    }

    /// Product of the absolute latitude and longitude spans
    pub fn area(&self) -> f64 {
        let lat_span = (self.max_lat - self.min_lat).to_f64().unwrap_or(0.0);
        let long_span = (self.max_long - self.min_long).to_f64().unwrap_or(0.0);
        (lat_span * long_span).abs()
    }

    /// Split at the midpoint into four quadrants.
    ///
    /// Order is fixed (lower-left, upper-left, lower-right, upper-right) so a
    /// crawl over identical input always walks regions in the same sequence.
    pub fn subdivide(&self) -> [Region; 4] {
        [
            Self::from_ordered(self.min_lat, self.mid_lat, self.min_long, self.mid_long),
            Self::from_ordered(self.mid_lat, self.max_lat, self.min_long, self.mid_long),
            Self::from_ordered(self.min_lat, self.mid_lat, self.mid_long, self.max_long),
            Self::from_ordered(self.mid_lat, self.max_lat, self.mid_long, self.max_long),
        ]
    }

    /// Distinct sub-regions that tile this one.
    ///
    /// Same order as `subdivide`, but an axis whose midpoint cannot fall
    /// strictly inside its span (zero span, or stuck at the 8-digit limit) is
    /// left whole, so a thin strip splits into two halves instead of four
    /// overlapping quadrants. An indivisible region yields only itself.
    pub fn children(&self) -> Vec<Region> {
        let lat_ranges = split_axis(self.min_lat, self.mid_lat, self.max_lat);
        let long_ranges = split_axis(self.min_long, self.mid_long, self.max_long);

        let mut children = Vec::with_capacity(lat_ranges.len() * long_ranges.len());
        for &(min_long, max_long) in &long_ranges {
            for &(min_lat, max_lat) in &lat_ranges {
                children.push(Self::from_ordered(min_lat, max_lat, min_long, max_long));
            }
        }
        children
    }

    /// True when both spans are at the 8-digit resolution limit, so
    /// subdividing would hand back a copy of this region.
    pub fn is_indivisible(&self) -> bool {
        let lat_stuck = self.mid_lat == self.min_lat || self.mid_lat == self.max_lat;
        let long_stuck = self.mid_long == self.min_long || self.mid_long == self.max_long;
        lat_stuck && long_stuck
    }

    /// Inclusive bounds check
    pub fn contains(&self, lat: Decimal, long: Decimal) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && long >= self.min_long && long <= self.max_long
    }
}

fn split_axis(min: Decimal, mid: Decimal, max: Decimal) -> Vec<(Decimal, Decimal)> {
    if min < mid && mid < max {
        vec![(min, mid), (mid, max)]
    } else {
        vec![(min, max)]
    }
}

fn midpoint(min: Decimal, max: Decimal) -> Decimal {
    let half_span = ((max - min) / Decimal::TWO)
        .round_dp_with_strategy(COORD_SCALE, RoundingStrategy::MidpointNearestEven);
    quantize(min + half_span)
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{},{} - {},{}>",
            format_coord(self.min_lat),
            format_coord(self.min_long),
            format_coord(self.max_lat),
            format_coord(self.max_long)
        )
    }
}
