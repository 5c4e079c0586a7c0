//! Stream compression.
//!
//! Numeric and boolean values and all timestamps are packed as
//! little-endian `f32` and zlib-deflated. Coordinate pairs are written as
//! JSON text and deflated.

use crate::streams::types::{CompressedStream, DataKind, RawStream, StreamType, StreamValues};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Errors raised when compressing a stream.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{stream_type}: {values} values for {timestamps} timestamps")]
    LengthMismatch {
        stream_type: StreamType,
        values: usize,
        timestamps: usize,
    },
    #[error("{stream_type}: values do not match data kind {expected:?}")]
    KindMismatch {
        stream_type: StreamType,
        expected: DataKind,
    },
    #[error("Deflate failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Coordinate serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when decompressing a stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Packed data length {0} is not a multiple of 4")]
    BadLength(usize),
    #[error("Corrupt deflate data: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("Bad coordinate text: {0}")]
    Text(#[from] serde_json::Error),
    #[error("Sample count mismatch: declared {declared}, {values} values, {timestamps} timestamps")]
    CountMismatch {
        declared: usize,
        values: usize,
        timestamps: usize,
    },
    #[error("Stream type {stream_type} cannot hold {data_kind:?} data")]
    KindMismatch {
        stream_type: StreamType,
        data_kind: DataKind,
    },
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn pack_f32(values: impl Iterator<Item = f64>) -> Vec<u8> {
    values.flat_map(|v| (v as f32).to_le_bytes()).collect()
}

fn unpack_f32(bytes: &[u8]) -> Result<Vec<f64>, DecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::BadLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect())
}

/// Compress one stream.
pub fn compress(stream: &RawStream) -> Result<CompressedStream, EncodeError> {
    let stream_type = stream.stream_type;
    let expected = stream_type.data_kind();
    if stream.values.data_kind() != expected {
        return Err(EncodeError::KindMismatch {
            stream_type,
            expected,
        });
    }
    if stream.values.len() != stream.timestamps.len() {
        return Err(EncodeError::LengthMismatch {
            stream_type,
            values: stream.values.len(),
            timestamps: stream.timestamps.len(),
        });
    }

    let packed_values = match &stream.values {
        StreamValues::Float(values) => pack_f32(values.iter().copied()),
        StreamValues::Boolean(values) => {
            pack_f32(values.iter().map(|b| if *b { 1.0 } else { 0.0 }))
        }
        StreamValues::Coordinate(values) => serde_json::to_vec(values)?,
    };
    let packed_timestamps = pack_f32(stream.timestamps.iter().copied());

    let compressed = CompressedStream {
        stream_type,
        data_kind: expected,
        compressed_values: deflate(&packed_values)?,
        compressed_timestamps: deflate(&packed_timestamps)?,
        sample_count: stream.len(),
    };

    tracing::debug!(
        stream = %stream_type,
        samples = compressed.sample_count,
        bytes = compressed.compressed_values.len() + compressed.compressed_timestamps.len(),
        "Compressed stream"
    );

    Ok(compressed)
}

/// Decompress one stream.
pub fn decompress(stream: &CompressedStream) -> Result<RawStream, DecodeError> {
    if stream.stream_type.data_kind() != stream.data_kind {
        return Err(DecodeError::KindMismatch {
            stream_type: stream.stream_type,
            data_kind: stream.data_kind,
        });
    }

    let timestamps = unpack_f32(&inflate(&stream.compressed_timestamps)?)?;
    let raw_values = inflate(&stream.compressed_values)?;

    let values = match stream.data_kind {
        DataKind::Float => StreamValues::Float(unpack_f32(&raw_values)?),
        DataKind::Boolean => StreamValues::Boolean(
            unpack_f32(&raw_values)?
                .into_iter()
                .map(|v| v != 0.0)
                .collect(),
        ),
        DataKind::Coordinate => StreamValues::Coordinate(serde_json::from_slice(&raw_values)?),
    };

    if values.len() != stream.sample_count || timestamps.len() != stream.sample_count {
        return Err(DecodeError::CountMismatch {
            declared: stream.sample_count,
            values: values.len(),
            timestamps: timestamps.len(),
        });
    }

    Ok(RawStream {
        stream_type: stream.stream_type,
        timestamps,
        values,
    })
}

/// Result of decoding a set of streams independently.
#[derive(Debug, Default)]
pub struct DecodedStreams {
    pub streams: Vec<RawStream>,
    pub failures: Vec<(StreamType, DecodeError)>,
}

impl DecodedStreams {
    /// Decoded stream of the given type.
    pub fn get(&self, stream_type: StreamType) -> Option<&RawStream> {
        self.streams.iter().find(|s| s.stream_type == stream_type)
    }
}

/// Decode every stream; a failing stream never blocks the others.
pub fn decode_all(streams: &[CompressedStream]) -> DecodedStreams {
    let mut decoded = DecodedStreams::default();
    for stream in streams {
        match decompress(stream) {
            Ok(raw) => decoded.streams.push(raw),
            Err(e) => {
                tracing::warn!(stream = %stream.stream_type, "Failed to decode stream: {}", e);
                decoded.failures.push((stream.stream_type, e));
            }
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_round_trip_within_f32() {
        let stream = RawStream::floats(
            StreamType::Power,
            vec![0.0, 1.0, 2.5],
            vec![201.3, 0.0, 1234.567],
        );
        let decoded = decompress(&compress(&stream).unwrap()).unwrap();

        let values = decoded.as_floats().unwrap();
        for (a, b) in values.iter().zip([201.3, 0.0, 1234.567]) {
            assert!((a - b).abs() < 1e-3);
        }
        assert_eq!(decoded.timestamps, vec![0.0, 1.0, 2.5]);
    }

    #[test]
    fn test_coordinates_are_exact() {
        let coords = vec![(47.376_887_123_4, 8.541_694_987_6), (-33.868_82, 151.209_29)];
        let stream = RawStream::coordinates(vec![0.0, 1.0], coords.clone());
        let decoded = decompress(&compress(&stream).unwrap()).unwrap();
        assert_eq!(decoded.values, StreamValues::Coordinate(coords));
    }

    #[test]
    fn test_booleans() {
        let stream = RawStream::booleans(StreamType::Moving, vec![0.0, 1.0, 2.0], vec![true, false, true]);
        let compressed = compress(&stream).unwrap();
        assert_eq!(compressed.data_kind, DataKind::Boolean);
        assert_eq!(decompress(&compressed).unwrap(), stream);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let stream = RawStream::floats(StreamType::Power, vec![0.0], vec![1.0, 2.0]);
        assert!(matches!(compress(&stream), Err(EncodeError::LengthMismatch { .. })));
    }

    #[test]
    fn test_corrupt_deflate() {
        let stream = RawStream::floats(StreamType::Power, vec![0.0], vec![100.0]);
        let mut compressed = compress(&stream).unwrap();
        compressed.compressed_values = vec![0xde, 0xad, 0xbe, 0xef];
        assert!(matches!(decompress(&compressed), Err(DecodeError::Inflate(_))));
    }

    #[test]
    fn test_count_mismatch() {
        let stream = RawStream::floats(StreamType::Cadence, vec![0.0, 1.0], vec![90.0, 91.0]);
        let mut compressed = compress(&stream).unwrap();
        compressed.sample_count = 3;
        assert!(matches!(
            decompress(&compressed),
            Err(DecodeError::CountMismatch { declared: 3, .. })
        ));
    }

    #[test]
    fn test_bad_length() {
        let mut compressed =
            compress(&RawStream::floats(StreamType::Speed, vec![0.0], vec![30.0])).unwrap();
        compressed.compressed_values = deflate(&[1, 2, 3]).unwrap();
        assert!(matches!(decompress(&compressed), Err(DecodeError::BadLength(3))));
    }

    #[test]
    fn test_decode_all_isolates_failures() {
        let mut power =
            compress(&RawStream::floats(StreamType::Power, vec![0.0], vec![200.0])).unwrap();
        power.compressed_values = vec![1, 2, 3];
        let hr =
            compress(&RawStream::floats(StreamType::HeartRate, vec![0.0], vec![140.0])).unwrap();

        let decoded = decode_all(&[power, hr]);
        assert_eq!(decoded.streams.len(), 1);
        assert!(decoded.get(StreamType::HeartRate).is_some());
        assert_eq!(decoded.failures.len(), 1);
        assert_eq!(decoded.failures[0].0, StreamType::Power);
    }
}
