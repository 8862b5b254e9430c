/// WGS84 TO UTM PROJECTION
///
/// The zone is taken from the first point of a track and every later point is
/// projected into that same zone, even if it drifts across a zone boundary.
/// Forward projection uses the Krüger series (third order), which stays
/// well under a millimetre inside a zone.

use std::fmt;

use geo::{point, HaversineDistance};

use crate::error::{Result, TrackError};
use crate::track_types::{GeoPoint, PlanarPoint};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub northern: bool,
}

impl UtmZone {
    pub fn new(number: u8, northern: bool) -> Result<Self> {
        if !(1..=60).contains(&number) {
            return Err(TrackError::Projection(format!(
                "UTM zone {} outside 1..=60",
                number
            )));
        }
        Ok(UtmZone { number, northern })
    }

    /// Longitude of the zone's central meridian, in degrees.
    pub fn central_meridian(&self) -> f64 {
        (self.number as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    /// EPSG code of the WGS84 / UTM CRS for this zone (326xx north, 327xx south).
    pub fn epsg_code(&self) -> u32 {
        let base = if self.northern { 32600 } else { 32700 };
        base + self.number as u32
    }
}

impl fmt::Display for UtmZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UTM Zone {}{}",
            self.number,
            if self.northern { "N" } else { "S" }
        )
    }
}

/// Picks the UTM zone from the first point of the track.
pub fn detect_zone(points: &[GeoPoint]) -> Result<UtmZone> {
    let first = points
        .first()
        .ok_or_else(|| TrackError::config("cannot detect UTM zone of an empty track"))?;

    check_coordinates(first)?;

    let raw = ((first.longitude + 180.0) / 6.0).floor() as i64 + 1;
    // lon = +180 lands on zone 61, which is zone 60's eastern edge
    let number = raw.clamp(1, 60) as u8;

    UtmZone::new(number, first.latitude >= 0.0)
}

/// Projects every point into `zone`. Altitude passes through untouched.
pub fn project_to_utm(points: &[GeoPoint], zone: UtmZone) -> Result<Vec<PlanarPoint>> {
    let projector = TransverseMercator::for_zone(zone);
    points
        .iter()
        .map(|p| {
            check_coordinates(p)?;
            let (easting, northing) = projector.forward(p.latitude, p.longitude);
            if !easting.is_finite() || !northing.is_finite() {
                return Err(TrackError::Projection(format!(
                    "point ({:.6}, {:.6}) cannot be represented in {}",
                    p.latitude, p.longitude, zone
                )));
            }
            Ok(PlanarPoint::new(easting, northing, p.altitude))
        })
        .collect()
}

/// Zone detection followed by projection, the way every track is handled.
pub fn project_track(points: &[GeoPoint]) -> Result<(UtmZone, Vec<PlanarPoint>)> {
    let zone = detect_zone(points)?;
    let planar = project_to_utm(points, zone)?;
    Ok((zone, planar))
}

/// Great-circle length of the raw track in meters (ignores altitude).
pub fn haversine_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| {
            let a = point!(x: w[0].longitude, y: w[0].latitude);
            let b = point!(x: w[1].longitude, y: w[1].latitude);
            a.haversine_distance(&b)
        })
        .sum()
}

fn check_coordinates(p: &GeoPoint) -> Result<()> {
    let valid = p.latitude.is_finite()
        && p.longitude.is_finite()
        && p.altitude.is_finite()
        && (-90.0..=90.0).contains(&p.latitude)
        && (-180.0..=180.0).contains(&p.longitude);
    if valid {
        Ok(())
    } else {
        Err(TrackError::Projection(format!(
            "invalid coordinate lat={} lon={} alt={}",
            p.latitude, p.longitude, p.altitude
        )))
    }
}

struct TransverseMercator {
    lon0: f64,
    false_northing: f64,
    e: f64,
    a_hat: f64,
    alpha: [f64; 3],
}

impl TransverseMercator {
    fn for_zone(zone: UtmZone) -> Self {
        let f = WGS84_F;
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;

        TransverseMercator {
            lon0: zone.central_meridian().to_radians(),
            false_northing: if zone.northern { 0.0 } else { FALSE_NORTHING_SOUTH },
            e: (f * (2.0 - f)).sqrt(),
            a_hat: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
        }
    }

    fn forward(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let phi = lat_deg.to_radians();
        let lambda = lon_deg.to_radians() - self.lon0;

        let sin_phi = phi.sin();
        // conformal latitude
        let t = (sin_phi.atanh() - self.e * (self.e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(lambda.cos());
        let eta_p = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        let easting = FALSE_EASTING + UTM_K0 * self.a_hat * eta;
        let northing = self.false_northing + UTM_K0 * self.a_hat * xi;
        (easting, northing)
    }
}
