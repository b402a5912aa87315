//! Geospatial helpers: great-circle distance, radius filtering and the tile
//! grid used to cover areas wider than one search viewport.

use crate::models::Listing;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude in the flat local approximation
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Smallest spacing between tile centers
const MIN_TILE_STEP_METERS: f64 = 800.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Haversine distance in meters
pub fn distance(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Keep listings within `radius` meters of `center`, nearest first.
/// Listings at equal distance keep their input order.
pub fn radius_filter(listings: Vec<Listing>, center: Point, radius: f64) -> Vec<Listing> {
    let mut within: Vec<(f64, Listing)> = listings
        .into_iter()
        .map(|listing| (distance(listing.coordinates(), center), listing))
        .filter(|(d, _)| *d <= radius)
        .collect();

    within.sort_by(|a, b| a.0.total_cmp(&b.0));
    within.into_iter().map(|(_, listing)| listing).collect()
}

/// Overlapping square grid of sub-centers covering the disk around `center`.
///
/// Uses a flat degrees/meter approximation, which is fine at the scale of a
/// city search. The grid is indexed in whole steps from the center, so the
/// center is always the first element and never repeated.
pub fn tile_centers(center: Point, radius: f64) -> Vec<Point> {
    if radius <= 0.0 {
        return vec![center];
    }

    let meters_per_deg_lon = (METERS_PER_DEG_LAT * (center.lat * PI / 180.0).cos()).max(1e-6);
    let step = (radius / 3.0).max(MIN_TILE_STEP_METERS);
    // tolerance keeps the rim when radius is an exact multiple of step
    let half = (radius / step + 1e-9).floor() as i64;
    let limit = (radius / step).powi(2) + 1e-9;

    let mut centers = Vec::with_capacity(49);
    centers.push(center);

    for i in -half..=half {
        for j in -half..=half {
            if (i == 0 && j == 0) || ((i * i + j * j) as f64) > limit {
                continue;
            }
            let (dy, dx) = (i as f64 * step, j as f64 * step);
            centers.push(Point::new(
                center.lat + dy / METERS_PER_DEG_LAT,
                center.lon + dx / meters_per_deg_lon,
            ));
        }
    }

    centers
}

/// Approximate width in meters of the map view at a zoom level, used as the
/// zoom component of proximity search URLs.
///
/// Web-Mercator meters-per-pixel over an 800px viewport, clamped to the range
/// proximity search accepts.
pub fn zoom_to_meters(zoom: u8, latitude: f64) -> u32 {
    if !(1..=21).contains(&zoom) {
        return 2000;
    }

    let meters_per_pixel = 156_543.033_92 * (latitude * PI / 180.0).cos() / f64::from(1u32 << zoom);
    let meters = (meters_per_pixel * 800.0) as i64;

    meters.clamp(51, 2000) as u32
}
