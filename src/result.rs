//! Per-frame detection results as loaded from a results container.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::text::write_float;

/// A numeric field, kept in the kind it was decoded with.
///
/// `F32` comes from single-precision numpy data and renders with the
/// shortest single-precision form (`0.1`, not `0.10000000149011612`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    F32(f32),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::F32(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(i64::try_from(v)
                    .map(Scalar::Int)
                    .unwrap_or(Scalar::Float(v as f64)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar::Float(v))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::F32(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::F32(v) => write_float(f, *v),
            Scalar::Float(v) => write_float(f, *v),
        }
    }
}

/// Identifier of a frame; either a string (e.g. "000001") or an integer index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum FrameId {
    Text(String),
    Index(i64),
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameId::Text(s) => f.write_str(s),
            FrameId::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for FrameId {
    fn from(value: &str) -> Self {
        FrameId::Text(value.to_string())
    }
}

/// Oriented 3D box in the lidar frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LidarBox {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
    pub length: Scalar,
    pub width: Scalar,
    pub height: Scalar,
    /// Yaw around the vertical axis, radians.
    pub rotation: Scalar,
}

impl LidarBox {
    /// Build a box from exactly seven values in `x y z l w h yaw` order.
    pub fn from_values(values: &[Scalar]) -> Option<Self> {
        match *values {
            [x, y, z, length, width, height, rotation] => Some(Self {
                x,
                y,
                z,
                length,
                width,
                height,
                rotation,
            }),
            _ => None,
        }
    }

    pub fn values(&self) -> [Scalar; 7] {
        [
            self.x,
            self.y,
            self.z,
            self.length,
            self.width,
            self.height,
            self.rotation,
        ]
    }
}

impl From<[f64; 7]> for LidarBox {
    fn from(v: [f64; 7]) -> Self {
        Self {
            x: v[0].into(),
            y: v[1].into(),
            z: v[2].into(),
            length: v[3].into(),
            width: v[4].into(),
            height: v[5].into(),
            rotation: v[6].into(),
        }
    }
}

/// Detections for a single frame. `boxes` and `scores` are index-aligned.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameResult {
    pub frame_id: FrameId,
    pub boxes: Vec<LidarBox>,
    pub scores: Vec<Scalar>,
}

impl FrameResult {
    pub fn detections(&self) -> impl Iterator<Item = (&LidarBox, Scalar)> + '_ {
        self.boxes.iter().zip(self.scores.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Every frame read from one results container, in input order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub frames: Vec<FrameResult>,
    /// Frames whose boxes/scores were cut to the shorter length on load.
    pub truncated_frames: usize,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_boxes(&self) -> usize {
        self.frames.iter().map(FrameResult::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_requires_seven_values() {
        let six = [Scalar::Float(1.0); 6];
        assert!(LidarBox::from_values(&six).is_none());

        let seven = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.1].map(Scalar::Float);
        let b = LidarBox::from_values(&seven).expect("seven values");
        assert_eq!(b.rotation, Scalar::Float(0.1));
        assert_eq!(b.values(), seven);
    }

    #[test]
    fn frame_id_displays_natural_form() {
        assert_eq!(FrameId::from("000001").to_string(), "000001");
        assert_eq!(FrameId::Index(42).to_string(), "42");
    }

    #[test]
    fn scalar_deserializes_ints_and_floats() {
        let values: Vec<Scalar> = serde_json::from_str("[1, 2.5, -3]").expect("parse");
        assert_eq!(
            values,
            vec![Scalar::Int(1), Scalar::Float(2.5), Scalar::Int(-3)]
        );
        assert!(serde_json::from_str::<Scalar>("\"1.0\"").is_err());
    }

    #[test]
    fn single_precision_renders_shortest_form() {
        assert_eq!(Scalar::F32(0.1).to_string(), "0.1");
        assert_eq!(Scalar::F32(0.87).to_string(), "0.87");
        assert_eq!(Scalar::Float(0.1f32 as f64).to_string(), "0.10000000149011612");
        assert_eq!(Scalar::F32(1.0).as_f64(), 1.0);
    }
}
