//! Station metadata (`Sta`, spec.md §3): antenna descriptor, marker, ECEF
//! position, antenna offset and receiver firmware/serial, as decoded from
//! site-metadata sub-records (BINEX `0x00`, RTCM 1005/1006/1007/1008/1033)
//! or configured locally for the stream server's own station.

/// Antenna offset reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AntennaOffsetFrame {
    /// East / North / Up, meters.
    Enu,
    /// ECEF X / Y / Z, meters.
    Xyz,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub marker_name: String,
    pub marker_number: String,
    pub antenna_descriptor: String,
    pub antenna_serial: String,
    pub receiver_type: String,
    pub receiver_firmware: String,
    pub receiver_serial: String,
    pub position_ecef_m: [f64; 3],
    pub antenna_offset: [f64; 3],
    pub antenna_offset_frame: AntennaOffsetFrame,
    pub station_id: u16,
}

impl Default for Station {
    fn default() -> Self {
        Self {
            marker_name: String::new(),
            marker_number: String::new(),
            antenna_descriptor: String::new(),
            antenna_serial: String::new(),
            receiver_type: String::new(),
            receiver_firmware: String::new(),
            receiver_serial: String::new(),
            position_ecef_m: [0.0; 3],
            antenna_offset: [0.0; 3],
            antenna_offset_frame: AntennaOffsetFrame::Enu,
            station_id: 0,
        }
    }
}

/// WGS84 ellipsoid constants, shared by the ECEF<->geodetic conversions
/// below and by the RTCM/BINEX station encoders.
pub const WGS84_A: f64 = 6_378_137.0;
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// `geodetic_to_ecef(lat, lon, h)`, angles in radians, height in meters.
pub fn geodetic_to_ecef(lat_rad: f64, lon_rad: f64, h_m: f64) -> [f64; 3] {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        (n + h_m) * cos_lat * cos_lon,
        (n + h_m) * cos_lat * sin_lon,
        (n * (1.0 - e2) + h_m) * sin_lat,
    ]
}

/// `ecef_to_geodetic`: iterative Bowring-style inversion, converging to
/// `1e-12` radians within a handful of iterations for all realistic
/// terrestrial heights.
pub fn ecef_to_geodetic(xyz_m: [f64; 3]) -> (f64, f64, f64) {
    let [x, y, z] = xyz_m;
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();

    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let h = p / lat.cos() - n;
        let new_lat = (z / p) / (1.0 - e2 * n / (n + h)).max(1e-12);
        let new_lat = new_lat.atan();
        if (new_lat - lat).abs() < 1e-13 {
            lat = new_lat;
            break;
        }
        lat = new_lat;
    }

    let sin_lat = lat.sin();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let h = if lat.cos().abs() > 1e-9 {
        p / lat.cos() - n
    } else {
        z / sin_lat - n * (1.0 - e2)
    };

    (lat, lon, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecef_geodetic_roundtrip() {
        let cases = [
            (0.0_f64, 0.0, 0.0),
            (45.0_f64.to_radians(), 30.0_f64.to_radians(), 1000.0),
            (-33.0_f64.to_radians(), -70.0_f64.to_radians(), 2500.0),
            (89.0_f64.to_radians(), 179.0_f64.to_radians(), -10.0),
        ];
        for (lat, lon, h) in cases {
            let ecef = geodetic_to_ecef(lat, lon, h);
            let (lat2, lon2, h2) = ecef_to_geodetic(ecef);
            assert!((lat - lat2).abs() < 1e-7, "lat {lat} vs {lat2}");
            assert!((lon - lon2).abs() < 1e-7, "lon {lon} vs {lon2}");
            assert!((h - h2).abs() < 1e-4, "h {h} vs {h2}");
        }
    }
}
