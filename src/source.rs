//! Results container decoding.
//!
//! A results container is a sequence of records, each carrying a frame id,
//! the predicted boxes in the lidar frame and one score per box. Records may
//! carry more fields (`name`, `pred_labels`, ...); those are ignored.
//!
//! Decoding happens in two steps: the container is parsed into loosely typed
//! records, then every record is checked and turned into a `FrameResult`. A
//! single bad record fails the whole load, before anything is written.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;

use crate::error::ConvertError;
use crate::result::{FrameId, FrameResult, LidarBox, ResultSet, Scalar};

/// Serialization format of a results container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    /// Python pickle (protocols 0 through 5) of dicts holding lists, numbers
    /// or numpy arrays.
    Pickle,
    /// JSON array of objects with the same fields.
    Json,
}

impl SourceFormat {
    /// Guess the format from the file extension; anything but `.json` is pickle.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SourceFormat::Json,
            _ => SourceFormat::Pickle,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Pickle => f.write_str("pickle"),
            SourceFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pickle" | "pkl" => Ok(SourceFormat::Pickle),
            "json" => Ok(SourceFormat::Json),
            other => Err(format!("unknown results format '{other}' (expected pickle|json)")),
        }
    }
}

/// What to do with a record whose boxes and scores differ in length.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LengthPolicy {
    /// Reject the record as malformed.
    #[default]
    Fail,
    /// Keep the pairs up to the shorter length and log a warning.
    Truncate,
}

impl fmt::Display for LengthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthPolicy::Fail => f.write_str("fail"),
            LengthPolicy::Truncate => f.write_str("truncate"),
        }
    }
}

impl FromStr for LengthPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(LengthPolicy::Fail),
            "truncate" => Ok(LengthPolicy::Truncate),
            other => Err(format!(
                "unknown length mismatch policy '{other}' (expected fail|truncate)"
            )),
        }
    }
}

/// A record as decoded, before any check.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRecord {
    #[serde(default, deserialize_with = "present")]
    pub(crate) frame_id: Option<RawFrameId>,
    #[serde(alias = "boxes")]
    pub(crate) boxes_lidar: Option<Vec<Vec<Scalar>>>,
    #[serde(alias = "scores")]
    pub(crate) score: Option<Vec<Scalar>>,
}

/// A frame id of any decoded type; only `Text` and `Index` are usable.
#[derive(Debug, PartialEq)]
pub(crate) enum RawFrameId {
    Text(String),
    Index(i64),
    Float(f64),
    Null,
    /// What was found instead, e.g. "a list".
    Other(&'static str),
}

// An explicit null must stay distinguishable from an absent field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RawFrameId>, D::Error> {
    RawFrameId::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for RawFrameId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawFrameIdVisitor;

        impl<'de> Visitor<'de> for RawFrameIdVisitor {
            type Value = RawFrameId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a frame id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Text(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Index(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawFrameId, E> {
                Ok(i64::try_from(v)
                    .map(RawFrameId::Index)
                    .unwrap_or(RawFrameId::Other("an out of range integer")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Float(v))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Other("a bool"))
            }

            fn visit_unit<E: de::Error>(self) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<RawFrameId, E> {
                Ok(RawFrameId::Null)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawFrameId, A::Error> {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(RawFrameId::Other("a list"))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawFrameId, A::Error> {
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(RawFrameId::Other("an object"))
            }
        }

        deserializer.deserialize_any(RawFrameIdVisitor)
    }
}

/// Read and validate a whole results container.
pub fn load_result_set(
    path: &Path,
    format: SourceFormat,
    policy: LengthPolicy,
) -> Result<ResultSet, ConvertError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConvertError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => ConvertError::SourceRead {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    let records = decode_records(BufReader::new(file), format).map_err(|message| {
        ConvertError::Decode {
            path: path.to_path_buf(),
            format,
            message,
        }
    })?;
    log::debug!("decoded {} records from {}", records.len(), path.display());
    build_result_set(records, policy)
}

/// Decode a results container held in memory.
pub fn parse_result_set(
    bytes: &[u8],
    format: SourceFormat,
    policy: LengthPolicy,
) -> Result<ResultSet, ConvertError> {
    let records = decode_records(bytes, format).map_err(|message| ConvertError::Decode {
        path: "<memory>".into(),
        format,
        message,
    })?;
    build_result_set(records, policy)
}

fn decode_records<R: Read>(reader: R, format: SourceFormat) -> Result<Vec<RawRecord>, String> {
    match format {
        SourceFormat::Pickle => crate::pickle::decode_records(reader),
        SourceFormat::Json => serde_json::from_reader(reader).map_err(|e| e.to_string()),
    }
}

fn build_result_set(
    records: Vec<RawRecord>,
    policy: LengthPolicy,
) -> Result<ResultSet, ConvertError> {
    let mut set = ResultSet {
        frames: Vec::with_capacity(records.len()),
        truncated_frames: 0,
    };
    let mut seen = HashSet::new();
    for (index, record) in records.into_iter().enumerate() {
        let (frame, truncated) = validate_record(index, record, policy)?;
        if !seen.insert(frame.frame_id.clone()) {
            log::warn!(
                "frame {} appears more than once; record #{} overwrites the earlier file",
                frame.frame_id,
                index
            );
        }
        if truncated {
            set.truncated_frames += 1;
        }
        set.frames.push(frame);
    }
    Ok(set)
}

fn validate_record(
    index: usize,
    record: RawRecord,
    policy: LengthPolicy,
) -> Result<(FrameResult, bool), ConvertError> {
    let malformed = |frame_id: Option<&FrameId>, reason: String| ConvertError::MalformedRecord {
        index,
        frame_id: frame_id.map(|id| id.to_string()),
        reason,
    };

    let frame_id = match record.frame_id {
        Some(RawFrameId::Text(id)) => FrameId::Text(id),
        Some(RawFrameId::Index(i)) => FrameId::Index(i),
        Some(RawFrameId::Float(v)) => {
            return Err(malformed(
                None,
                format!("frame_id {v:?} is a float; expected a string or integer"),
            ));
        }
        Some(RawFrameId::Null) => {
            return Err(malformed(None, "frame_id is null".to_string()));
        }
        Some(RawFrameId::Other(found)) => {
            return Err(malformed(
                None,
                format!("frame_id is {found}; expected a string or integer"),
            ));
        }
        None => return Err(malformed(None, "missing field `frame_id`".to_string())),
    };
    validate_frame_id(&frame_id).map_err(|reason| malformed(Some(&frame_id), reason))?;
    let raw_boxes = record.boxes_lidar.ok_or_else(|| {
        malformed(
            Some(&frame_id),
            "missing field `boxes_lidar` (or `boxes`)".to_string(),
        )
    })?;
    let mut scores = record.score.ok_or_else(|| {
        malformed(
            Some(&frame_id),
            "missing field `score` (or `scores`)".to_string(),
        )
    })?;

    let mut boxes = raw_boxes
        .iter()
        .enumerate()
        .map(|(j, values)| {
            LidarBox::from_values(values).ok_or_else(|| {
                malformed(
                    Some(&frame_id),
                    format!("box {} has {} values, expected 7", j, values.len()),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut truncated = false;
    if boxes.len() != scores.len() {
        match policy {
            LengthPolicy::Fail => {
                return Err(malformed(
                    Some(&frame_id),
                    format!("{} boxes but {} scores", boxes.len(), scores.len()),
                ));
            }
            LengthPolicy::Truncate => {
                let keep = boxes.len().min(scores.len());
                log::warn!(
                    "frame {}: {} boxes but {} scores, keeping the first {}",
                    frame_id,
                    boxes.len(),
                    scores.len(),
                    keep
                );
                boxes.truncate(keep);
                scores.truncate(keep);
                truncated = true;
            }
        }
    }

    Ok((
        FrameResult {
            frame_id,
            boxes,
            scores,
        },
        truncated,
    ))
}

/// A frame id becomes a single path segment of the output file name.
pub fn validate_frame_id(frame_id: &FrameId) -> Result<(), String> {
    let FrameId::Text(id) = frame_id else {
        return Ok(());
    };
    if id.is_empty() {
        return Err("frame_id is empty".to_string());
    }
    if id == "." || id == ".." {
        return Err(format!("frame_id '{id}' is not a file name"));
    }
    if id.contains(&['/', '\\', '\0'][..]) {
        return Err(format!("frame_id '{id}' contains a path separator"));
    }
    Ok(())
}
