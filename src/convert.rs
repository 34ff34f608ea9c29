use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ConvertError;
use crate::result::{FrameId, FrameResult, ResultSet};
use crate::source::{load_result_set, LengthPolicy, SourceFormat};
use crate::text::write_frame;

/// Knobs for a conversion run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertOptions {
    /// Container format; inferred from the source extension when unset.
    pub format: Option<SourceFormat>,
    pub length_policy: LengthPolicy,
}

/// Outcome of a successful run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConvertReport {
    pub frames_written: usize,
    pub boxes_written: usize,
    pub truncated_frames: usize,
}

/// Progress hooks for a conversion run.
///
/// Hooks are informational; they cannot stop the run.
pub trait ConvertObserver {
    /// Called once after the result set is loaded, before any file is written.
    fn frames_loaded(&mut self, _total: usize) {}

    /// Called after the file for a frame has been flushed.
    fn frame_written(&mut self, _frame_id: &FrameId, _path: &Path, _boxes: usize) {}
}

/// Observer that ignores every hook.
pub struct NoopObserver;

impl ConvertObserver for NoopObserver {}

/// Writes one `<frame_id>.txt` per frame of a results container.
#[derive(Clone, Debug, Default)]
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Load and validate the whole results container.
    pub fn load(&self, source: &Path) -> Result<ResultSet, ConvertError> {
        let format = self
            .options
            .format
            .unwrap_or_else(|| SourceFormat::from_path(source));
        log::info!("loading {} results from {}", format, source.display());
        let set = load_result_set(source, format, self.options.length_policy)?;
        log::info!(
            "loaded {} frames ({} boxes)",
            set.len(),
            set.total_boxes()
        );
        Ok(set)
    }

    /// Write every frame of `set` into `output_dir`, creating the directory.
    pub fn write(
        &self,
        set: &ResultSet,
        output_dir: &Path,
        observer: &mut dyn ConvertObserver,
    ) -> Result<ConvertReport, ConvertError> {
        log::info!("creating output directory {}", output_dir.display());
        std::fs::create_dir_all(output_dir).map_err(|e| ConvertError::OutputWrite {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

        let mut report = ConvertReport {
            truncated_frames: set.truncated_frames,
            ..ConvertReport::default()
        };
        if set.is_empty() {
            log::info!("no frames in results, nothing to write");
            return Ok(report);
        }

        observer.frames_loaded(set.len());
        for frame in &set.frames {
            let path = frame_path(output_dir, &frame.frame_id);
            log::debug!("writing {}", path.display());
            let boxes = write_frame_file(&path, frame)?;
            log::info!("completed frame {} ({} boxes)", frame.frame_id, boxes);
            observer.frame_written(&frame.frame_id, &path, boxes);
            report.frames_written += 1;
            report.boxes_written += boxes;
        }
        Ok(report)
    }

    /// Load `source` and write its frames into `output_dir`.
    pub fn run(
        &self,
        source: &Path,
        output_dir: &Path,
        observer: &mut dyn ConvertObserver,
    ) -> Result<ConvertReport, ConvertError> {
        let set = self.load(source)?;
        self.write(&set, output_dir, observer)
    }
}

/// Convert with default options; returns the number of files written.
pub fn convert(source: &Path, output_dir: &Path) -> Result<usize, ConvertError> {
    let report = Converter::default().run(source, output_dir, &mut NoopObserver)?;
    Ok(report.frames_written)
}

/// Output file of a frame: `<output_dir>/<frame_id>.txt`.
pub fn frame_path(output_dir: &Path, frame_id: &FrameId) -> PathBuf {
    output_dir.join(format!("{frame_id}.txt"))
}

fn write_frame_file(path: &Path, frame: &FrameResult) -> Result<usize, ConvertError> {
    let to_err = |e: std::io::Error| ConvertError::OutputWrite {
        path: path.to_path_buf(),
        source: e,
    };
    let file = File::create(path).map_err(to_err)?;
    let mut out = BufWriter::new(file);
    let lines = write_frame(&mut out, frame).map_err(to_err)?;
    out.flush().map_err(to_err)?;
    Ok(lines)
}
