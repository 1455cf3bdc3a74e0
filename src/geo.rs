use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Tag, Value};
use rand::Rng;

use crate::config::{GeoConfig, GeoSource};
use crate::detection::GeoPoint;

/// Base coordinate moved by an independent uniform offset in `[-jitter, jitter]`
/// on each axis. This is a stand-in, it says nothing about where the image was taken.
pub fn jittered<R: Rng>(config: &GeoConfig, rng: &mut R) -> GeoPoint {
    let offset = |rng: &mut R| {
        if config.jitter > 0.0 {
            rng.gen_range(-config.jitter..=config.jitter)
        } else {
            0.0
        }
    };
    GeoPoint {
        lat: config.base_lat + offset(rng),
        lon: config.base_lon + offset(rng),
    }
}

/// Image centre for `path` according to the configured source.
pub fn image_center(path: &Path, config: &GeoConfig) -> GeoPoint {
    match config.source {
        GeoSource::Jitter => jittered(config, &mut rand::thread_rng()),
        GeoSource::Exif => match read_gps(path) {
            Some(point) => point,
            None => {
                tracing::warn!("no GPS data in {}, using placeholder location", path.display());
                jittered(config, &mut rand::thread_rng())
            }
        },
    }
}

/// Reads GPSLatitude/GPSLongitude and their refs from the EXIF block.
pub fn read_gps(path: &Path) -> Option<GeoPoint> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;

    let lat = coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let lon = coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    let point = GeoPoint { lat, lon };
    point.is_valid().then_some(point)
}

fn coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let dms: Vec<f64> = parts.iter().map(|r| r.to_f64()).collect();

    let hemisphere = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(values) => values.first().and_then(|v| v.first()).map(|b| *b as char),
            _ => None,
        })
        .unwrap_or('N');
    dms_to_decimal(&dms, hemisphere)
}

/// Degrees, minutes, seconds to signed decimal degrees; `S` and `W` are negative.
pub fn dms_to_decimal(dms: &[f64], hemisphere: char) -> Option<f64> {
    if dms.is_empty() || dms.len() > 3 || dms.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let degrees = dms[0] + dms.get(1).unwrap_or(&0.0) / 60.0 + dms.get(2).unwrap_or(&0.0) / 3600.0;
    match hemisphere.to_ascii_uppercase() {
        'S' | 'W' => Some(-degrees),
        _ => Some(degrees),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BASE_LAT, BASE_LON};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn jitter_stays_within_range() {
        let config = GeoConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let p = jittered(&config, &mut rng);
            assert!((p.lat - BASE_LAT).abs() <= 0.01 + 1e-12);
            assert!((p.lon - BASE_LON).abs() <= 0.01 + 1e-12);
        }
    }

    #[test]
    fn zero_jitter_returns_base() {
        let config = GeoConfig {
            jitter: 0.0,
            ..GeoConfig::default()
        };
        let p = jittered(&config, &mut StdRng::seed_from_u64(1));
        assert_eq!(p, GeoPoint { lat: BASE_LAT, lon: BASE_LON });
    }

    #[test]
    fn dms_conversion_honours_hemisphere() {
        let lat = dms_to_decimal(&[29.0, 54.0, 11.52], 'N').unwrap();
        assert!((lat - 29.9032).abs() < 1e-9);
        let lon = dms_to_decimal(&[91.0, 54.0, 6.48], 'W').unwrap();
        assert!((lon + 91.9018).abs() < 1e-9);
        assert!(dms_to_decimal(&[], 'N').is_none());
    }

    #[test]
    fn exif_source_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        image::RgbImage::new(8, 8).save(&path).unwrap();
        assert!(read_gps(&path).is_none());

        let config = GeoConfig {
            source: GeoSource::Exif,
            ..GeoConfig::default()
        };
        let p = image_center(&path, &config);
        assert!((p.lat - BASE_LAT).abs() <= 0.01 + 1e-12);
    }
}
