//! Geospatial helper: deterministic 52-bit geohash encode/decode and
//! Haversine distance, stored as ordinary sorted-set scores per spec.md
//! §4.2's geo row. Treated as a pure helper; bit-interleave precision loss
//! is a known limitation (spec.md §9), not something to fix here.

const GEO_STEP: u32 = 26; // bits per axis -> 52 bits total, fits f64's mantissa exactly
const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;
pub const EARTH_RADIUS_M: f64 = 6372797.560856;

/// Interleaves the bits of two 26-bit integers into a 52-bit geohash.
fn interleave64(xlo: u32, ylo: u32) -> u64 {
    const B: [u64; 5] = [
        0x5555555555555555,
        0x3333333333333333,
        0x0F0F0F0F0F0F0F0F,
        0x00FF00FF00FF00FF,
        0x0000FFFF0000FFFF,
    ];
    const S: [u32; 5] = [1, 2, 4, 8, 16];

    let mut x = xlo as u64;
    let mut y = ylo as u64;
    for i in (0..5).rev() {
        x = (x | (x << S[i])) & B[i];
        y = (y | (y << S[i])) & B[i];
    }
    x | (y << 1)
}

fn deinterleave64(interleaved: u64) -> (u32, u32) {
    const B: [u64; 6] = [
        0x5555555555555555,
        0x3333333333333333,
        0x0F0F0F0F0F0F0F0F,
        0x00FF00FF00FF00FF,
        0x0000FFFF0000FFFF,
        0x00000000FFFFFFFF,
    ];
    const S: [u32; 6] = [0, 1, 2, 4, 8, 16];

    let mut x = interleaved;
    let mut y = interleaved >> 1;
    for i in 0..6 {
        x = (x | (x >> S[i])) & B[i];
        y = (y | (y >> S[i])) & B[i];
    }
    (x as u32, y as u32)
}

/// Encodes `(lon, lat)` into the 52-bit geohash score used as the sorted-set
/// member score. Callers are responsible for validating `|lon| <= 180`,
/// `|lat| <= 90` before calling.
pub fn encode(lon: f64, lat: f64) -> u64 {
    let lat_offset = (lat - LAT_MIN) / (LAT_MAX - LAT_MIN);
    let lon_offset = (lon - LON_MIN) / (LON_MAX - LON_MIN);
    let ilato = (lat_offset * (1u64 << GEO_STEP) as f64) as u32;
    let ilono = (lon_offset * (1u64 << GEO_STEP) as f64) as u32;
    interleave64(ilato, ilono)
}

/// Decodes a geohash back to the bounding box's center `(lon, lat)`.
pub fn decode(bits: u64) -> (f64, f64) {
    let (ilato, ilono) = deinterleave64(bits);
    let scale = (1u64 << GEO_STEP) as f64;

    let lat_min = LAT_MIN + (ilato as f64 / scale) * (LAT_MAX - LAT_MIN);
    let lat_max = LAT_MIN + ((ilato + 1) as f64 / scale) * (LAT_MAX - LAT_MIN);
    let lon_min = LON_MIN + (ilono as f64 / scale) * (LON_MAX - LON_MIN);
    let lon_max = LON_MIN + ((ilono + 1) as f64 / scale) * (LON_MAX - LON_MIN);

    ((lon_min + lon_max) / 2.0, (lat_min + lat_max) / 2.0)
}

/// Great-circle distance between two points in meters (Haversine formula,
/// Earth radius fixed per spec.md §4.2).
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lat1r = lat1.to_radians();
    let lat2r = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Converts a meter distance into the requested unit. Unknown units fall
/// back to meters; callers validate the unit string before calling.
pub fn convert_from_meters(m: f64, unit: &str) -> f64 {
    match unit {
        "km" => m / 1000.0,
        "ft" => m * 3.28084,
        "mi" => m / 1609.34,
        _ => m,
    }
}

/// Converts a distance given in the requested unit back into meters.
pub fn convert_to_meters(v: f64, unit: &str) -> f64 {
    match unit {
        "km" => v * 1000.0,
        "ft" => v / 3.28084,
        "mi" => v * 1609.34,
        _ => v,
    }
}

/// A base32 text encoding of the geohash bits, as returned by `GEOHASH`.
pub fn to_base32(bits: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";
    let mut out = String::with_capacity(11);
    // Redis emits 11 base32 characters (55 bits) from the 52-bit hash,
    // left-padding the low 3 bits with zero.
    let widened = bits << 3;
    for i in 0..11 {
        let shift = 55 - (i + 1) * 5;
        let idx = ((widened >> shift) & 0x1f) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_stays_in_cell() {
        let (lon, lat) = (13.361389, 38.115556);
        let bits = encode(lon, lat);
        let (dlon, dlat) = decode(bits);
        assert!((dlon - lon).abs() < 0.001);
        assert!((dlat - lat).abs() < 0.001);
    }

    #[test]
    fn haversine_known_distance() {
        // Palermo <-> Catania, ~166 km per Redis's own GEO test fixture.
        let d = haversine_m(13.361389, 38.115556, 15.087269, 37.502669);
        assert!((d - 166274.0).abs() < 2000.0);
    }

    #[test]
    fn unit_conversion() {
        assert!((convert_from_meters(1000.0, "km") - 1.0).abs() < 1e-9);
    }
}
