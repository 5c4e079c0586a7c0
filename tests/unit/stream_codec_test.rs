//! Unit tests for stream compression.

use ridelink::streams::{
    compress, decode_all, decompress, DataKind, DecodeError, RawStream, StreamType,
};

fn seconds(n: usize) -> Vec<f64> {
    (0..n).map(|s| s as f64).collect()
}

#[test]
fn test_stream_kinds() {
    assert_eq!(StreamType::Power.data_kind(), DataKind::Float);
    assert_eq!(StreamType::Location.data_kind(), DataKind::Coordinate);
    assert_eq!(StreamType::Moving.data_kind(), DataKind::Boolean);

    for stream_type in StreamType::ALL {
        assert_eq!(stream_type.as_str().parse::<StreamType>(), Ok(stream_type));
    }
    assert!("watts".parse::<StreamType>().is_err());
}

#[test]
fn test_long_ride_compresses() {
    let n = 3600;
    let power: Vec<f64> = (0..n).map(|s| 200.0 + (s % 10) as f64).collect();
    let stream = RawStream::floats(StreamType::Power, seconds(n), power.clone());

    let compressed = compress(&stream).unwrap();
    assert_eq!(compressed.sample_count, n);
    assert!(compressed.compressed_values.len() < n * 4);

    let decoded = decompress(&compressed).unwrap();
    assert_eq!(decoded.as_floats().unwrap(), power.as_slice());
    assert_eq!(decoded.timestamps, seconds(n));
}

#[test]
fn test_moving_stream() {
    let flags = vec![true, true, false, true];
    let stream = RawStream::booleans(StreamType::Moving, seconds(4), flags.clone());

    let decoded = decompress(&compress(&stream).unwrap()).unwrap();
    assert_eq!(decoded, stream);
}

#[test]
fn test_location_needs_coordinates() {
    let stream = RawStream::floats(StreamType::Location, seconds(2), vec![1.0, 2.0]);
    assert!(compress(&stream).is_err());
}

#[test]
fn test_wrong_declared_kind() {
    let stream = RawStream::floats(StreamType::Cadence, seconds(3), vec![90.0; 3]);
    let mut compressed = compress(&stream).unwrap();
    compressed.data_kind = DataKind::Coordinate;

    assert!(matches!(
        decompress(&compressed),
        Err(DecodeError::KindMismatch { .. })
    ));
}

#[test]
fn test_one_bad_stream_keeps_the_rest() {
    let hr = compress(&RawStream::floats(StreamType::HeartRate, seconds(5), vec![140.0; 5])).unwrap();
    let mut cadence =
        compress(&RawStream::floats(StreamType::Cadence, seconds(5), vec![90.0; 5])).unwrap();
    cadence.sample_count = 6;

    let decoded = decode_all(&[hr, cadence]);
    assert!(decoded.get(StreamType::HeartRate).is_some());
    assert!(decoded.get(StreamType::Cadence).is_none());
    assert_eq!(decoded.failures.len(), 1);
}
