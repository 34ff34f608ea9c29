//! Lidar detection results to text.
//!
//! Converts the per-frame output of a 3D point-cloud detector (a pickled or
//! JSON list of `{frame_id, boxes_lidar, score}` records) into one text file
//! per frame. Each line of `<frame_id>.txt` holds one box:
//!
//! ```text
//! x y z length width height rotation score
//! ```
//!
//! # Module Structure
//!
//! - `result`: frame/box/score types
//! - `source`: container decoding and record validation
//! - `pickle`: pickled record graphs, numpy arrays included
//! - `text`: line rendering
//! - `convert`: the `Converter` and its observer hooks
//! - `config`: file + environment + CLI configuration

pub mod config;
pub mod convert;
pub mod error;
mod pickle;
pub mod result;
pub mod source;
pub mod text;

pub use config::{ConfigOverrides, ExportConfig};
pub use convert::{
    convert, frame_path, ConvertObserver, ConvertOptions, ConvertReport, Converter, NoopObserver,
};
pub use error::ConvertError;
pub use result::{FrameId, FrameResult, LidarBox, ResultSet, Scalar};
pub use source::{load_result_set, parse_result_set, LengthPolicy, SourceFormat};
