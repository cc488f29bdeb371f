//! Spatial reference codes.

use std::fmt;

/// EPSG code of a spatial reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Epsg(pub u32);

/// Well-known geographic (degree-based) CRS codes.
const GEOGRAPHIC_CODES: &[u32] = &[4326, 4979, 4258, 4937, 4269, 4267, 4283, 4617, 4674, 4490];

impl Epsg {
    /// WGS84 longitude/latitude.
    pub const WGS84: Epsg = Epsg(4326);
    /// WGS84 earth-centred earth-fixed cartesian frame.
    pub const ECEF: Epsg = Epsg(4978);

    pub fn code(self) -> u32 {
        self.0
    }

    /// Degree-based spatial reference.
    pub fn is_geographic(self) -> bool {
        GEOGRAPHIC_CODES.contains(&self.0)
    }

    /// WGS84 / UTM zone containing the given longitude/latitude
    /// (`326zz` north, `327zz` south).
    pub fn utm_for(lon: f64, lat: f64) -> Epsg {
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u32;
        if lat >= 0.0 {
            Epsg(32600 + zone)
        } else {
            Epsg(32700 + zone)
        }
    }
}

impl fmt::Display for Epsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// WGS84 `[lon_deg, lat_deg, h]` to geocentric `[x, y, z]`.
pub fn geodetic_to_ecef(p: [f64; 3]) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (lon, lat) = (p[0].to_radians(), p[1].to_radians());
    let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    [
        (n + p[2]) * lat.cos() * lon.cos(),
        (n + p[2]) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + p[2]) * lat.sin(),
    ]
}

/// Geocentric `[x, y, z]` to WGS84 `[lon_deg, lat_deg, h]` (Bowring).
pub fn ecef_to_geodetic(p: [f64; 3]) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let b = WGS84_A * (1.0 - WGS84_F);
    let ep2 = (WGS84_A * WGS84_A - b * b) / (b * b);
    let (x, y, z) = (p[0], p[1], p[2]);
    let r = x.hypot(y);
    let theta = (z * WGS84_A).atan2(r * b);
    let lat = (z + ep2 * b * theta.sin().powi(3)).atan2(r - e2 * WGS84_A * theta.cos().powi(3));
    let lon = y.atan2(x);
    let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    let h = if lat.cos().abs() > 1e-10 {
        r / lat.cos() - n
    } else {
        z.abs() - b
    };
    [lon.to_degrees(), lat.to_degrees(), h]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_zone_from_lon_lat() {
        assert_eq!(Epsg::utm_for(1.44, 43.6), Epsg(32631));
        assert_eq!(Epsg::utm_for(-70.6, -33.4), Epsg(32719));
        assert_eq!(Epsg::utm_for(-180.0, 10.0), Epsg(32601));
        assert_eq!(Epsg::utm_for(180.0, 10.0), Epsg(32660));
        assert_eq!(Epsg::utm_for(0.0, 0.0), Epsg(32631));
    }

    #[test]
    fn ecef_round_trip() {
        for p in [[1.44, 43.6, 150.0], [-70.6, -33.4, 2500.0], [179.9, 0.0, -30.0]] {
            let back = ecef_to_geodetic(geodetic_to_ecef(p));
            approx::assert_abs_diff_eq!(back[0], p[0], epsilon = 1e-9);
            approx::assert_abs_diff_eq!(back[1], p[1], epsilon = 1e-9);
            approx::assert_abs_diff_eq!(back[2], p[2], epsilon = 1e-3);
        }
        let equator = geodetic_to_ecef([0.0, 0.0, 0.0]);
        approx::assert_abs_diff_eq!(equator[0], WGS84_A, epsilon = 1e-6);
    }

    #[test]
    fn geographic_codes() {
        assert!(Epsg::WGS84.is_geographic());
        assert!(!Epsg::ECEF.is_geographic());
        assert!(!Epsg(32631).is_geographic());
        assert_eq!(Epsg(2154).to_string(), "EPSG:2154");
    }
}
