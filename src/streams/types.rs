//! Stream data types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of recorded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Power,
    HeartRate,
    Cadence,
    Speed,
    Distance,
    Location,
    /// Whether the rider was moving at each tick
    Moving,
}

impl StreamType {
    pub const ALL: [StreamType; 7] = [
        StreamType::Power,
        StreamType::HeartRate,
        StreamType::Cadence,
        StreamType::Speed,
        StreamType::Distance,
        StreamType::Location,
        StreamType::Moving,
    ];

    /// Storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Power => "power",
            StreamType::HeartRate => "heart_rate",
            StreamType::Cadence => "cadence",
            StreamType::Speed => "speed",
            StreamType::Distance => "distance",
            StreamType::Location => "location",
            StreamType::Moving => "moving",
        }
    }

    /// Encoding used for this stream's values.
    pub fn data_kind(&self) -> DataKind {
        match self {
            StreamType::Location => DataKind::Coordinate,
            StreamType::Moving => DataKind::Boolean,
            _ => DataKind::Float,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown stream type: {}", s))
    }
}

/// Value encoding of a compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Float,
    Coordinate,
    Boolean,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Float => "float",
            DataKind::Coordinate => "coordinate",
            DataKind::Boolean => "boolean",
        }
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" => Ok(DataKind::Float),
            "coordinate" => Ok(DataKind::Coordinate),
            "boolean" => Ok(DataKind::Boolean),
            other => Err(format!("unknown data kind: {}", other)),
        }
    }
}

/// Decoded stream values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum StreamValues {
    Float(Vec<f64>),
    /// `(latitude, longitude)` pairs
    Coordinate(Vec<(f64, f64)>),
    Boolean(Vec<bool>),
}

impl StreamValues {
    pub fn len(&self) -> usize {
        match self {
            StreamValues::Float(v) => v.len(),
            StreamValues::Coordinate(v) => v.len(),
            StreamValues::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_kind(&self) -> DataKind {
        match self {
            StreamValues::Float(_) => DataKind::Float,
            StreamValues::Coordinate(_) => DataKind::Coordinate,
            StreamValues::Boolean(_) => DataKind::Boolean,
        }
    }
}

/// An uncompressed stream: one value per timestamp.
///
/// Timestamps are seconds since the start of recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStream {
    pub stream_type: StreamType,
    pub timestamps: Vec<f64>,
    pub values: StreamValues,
}

impl RawStream {
    pub fn floats(stream_type: StreamType, timestamps: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            stream_type,
            timestamps,
            values: StreamValues::Float(values),
        }
    }

    pub fn coordinates(timestamps: Vec<f64>, values: Vec<(f64, f64)>) -> Self {
        Self {
            stream_type: StreamType::Location,
            timestamps,
            values: StreamValues::Coordinate(values),
        }
    }

    pub fn booleans(stream_type: StreamType, timestamps: Vec<f64>, values: Vec<bool>) -> Self {
        Self {
            stream_type,
            timestamps,
            values: StreamValues::Boolean(values),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Float values, if this is a float stream.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match &self.values {
            StreamValues::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// A compressed stream as stored and submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedStream {
    pub stream_type: StreamType,
    pub data_kind: DataKind,
    pub compressed_values: Vec<u8>,
    pub compressed_timestamps: Vec<u8>,
    pub sample_count: usize,
}
