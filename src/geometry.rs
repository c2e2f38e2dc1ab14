//! Point geometry stored in the master relation.

use std::fmt;
use std::str::FromStr;

/// SRID of WGS84 geographic coordinates.
pub const WGS84: u32 = 4326;

/// A 2-D point. `x` is longitude and `y` is latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
    pub srid: u32,
}

impl GeoPoint {
    /// Build a WGS84 point from latitude and longitude.
    ///
    /// Returns `None` unless both coordinates are finite; a point is never synthesized from
    /// partial input.
    pub fn from_lat_lon(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some(Self {
                x: lon,
                y: lat,
                srid: WGS84,
            }),
            _ => None,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.y
    }

    pub fn longitude(&self) -> f64 {
        self.x
    }

    /// Render as extended WKT, e.g. `SRID=4326;POINT(-87.6298 41.8781)`.
    pub fn to_ewkt(&self) -> String {
        self.to_string()
    }

    /// Parse extended WKT (or plain WKT, assumed WGS84).
    pub fn from_ewkt(s: &str) -> Result<Self, ParsePointError> {
        s.parse()
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SRID={};POINT({} {})", self.srid, self.x, self.y)
    }
}

/// Error returned when a string is not a WKT point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid point geometry: {0}")]
pub struct ParsePointError(String);

impl FromStr for GeoPoint {
    type Err = ParsePointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (srid, wkt) = match s.split_once(';') {
            Some((prefix, rest)) => {
                let srid = prefix
                    .trim()
                    .strip_prefix("SRID=")
                    .and_then(|v| v.parse::<u32>().ok())
                    .ok_or_else(|| ParsePointError(format!("bad SRID prefix '{prefix}'")))?;
                (srid, rest.trim())
            }
            None => (WGS84, s),
        };

        let body = wkt
            .strip_prefix("POINT")
            .map(str::trim_start)
            .and_then(|b| b.strip_prefix('('))
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| ParsePointError(format!("expected POINT(x y), got '{wkt}'")))?;

        let mut coords = body.split_whitespace().map(str::parse::<f64>);
        match (coords.next(), coords.next(), coords.next()) {
            (Some(Ok(x)), Some(Ok(y)), None) => Ok(Self { x, y, srid }),
            _ => Err(ParsePointError(format!("expected two coordinates, got '{body}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GeoPoint, WGS84};

    #[test]
    fn ewkt_round_trips_exact_coordinates() {
        let p = GeoPoint::from_lat_lon(Some(41.8781), Some(-87.6298)).unwrap();
        let text = p.to_ewkt();
        assert_eq!(text, "SRID=4326;POINT(-87.6298 41.8781)");

        let back = GeoPoint::from_ewkt(&text).unwrap();
        assert_eq!(back.latitude(), 41.8781);
        assert_eq!(back.longitude(), -87.6298);
        assert_eq!(back.srid, WGS84);
    }

    #[test]
    fn missing_coordinate_never_yields_a_point() {
        assert_eq!(GeoPoint::from_lat_lon(Some(41.8781), None), None);
        assert_eq!(GeoPoint::from_lat_lon(None, Some(-87.6298)), None);
        assert_eq!(GeoPoint::from_lat_lon(Some(f64::NAN), Some(1.0)), None);
    }

    #[test]
    fn plain_wkt_defaults_to_wgs84() {
        let p: GeoPoint = "POINT (1.5 2.5)".parse().unwrap();
        assert_eq!((p.x, p.y, p.srid), (1.5, 2.5, WGS84));
        assert!("LINESTRING(0 0, 1 1)".parse::<GeoPoint>().is_err());
    }
}
