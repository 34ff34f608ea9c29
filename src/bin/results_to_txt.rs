//! results_to_txt - write one `<frame_id>.txt` box file per frame of a
//! detector results container.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use lidar_results_txt::{ConfigOverrides, Converter, ExportConfig, LengthPolicy, SourceFormat};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Results container (pickle or JSON list of frame records).
    source: Option<PathBuf>,
    /// Directory receiving one text file per frame.
    output_dir: Option<PathBuf>,
    /// JSON or TOML config file.
    #[arg(long, env = "RESULTS_TXT_CONFIG")]
    config: Option<PathBuf>,
    /// Container format (pickle|json); inferred from the extension by default.
    #[arg(long)]
    format: Option<SourceFormat>,
    /// Boxes/scores length mismatch handling (fail|truncate).
    #[arg(long, value_name = "POLICY")]
    on_length_mismatch: Option<LengthPolicy>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    let cfg = ExportConfig::load(ConfigOverrides {
        config_path: args.config,
        source: args.source,
        output_dir: args.output_dir,
        format: args.format,
        length_policy: args.on_length_mismatch,
    })?;
    let converter = Converter::new(cfg.convert_options());

    if let Err(err) = run(&ui, &converter, &cfg) {
        log::error!("conversion failed: {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}

fn run(ui: &ui::Ui, converter: &Converter, cfg: &ExportConfig) -> Result<()> {
    let set = {
        let _stage = ui.stage("Load results");
        converter
            .load(&cfg.source)
            .with_context(|| format!("loading {}", cfg.source.display()))?
    };
    let report = {
        let _stage = ui.stage("Write frames");
        let mut progress = ui.frames();
        converter
            .write(&set, &cfg.output_dir, &mut progress)
            .with_context(|| format!("writing into {}", cfg.output_dir.display()))?
    };
    if report.truncated_frames > 0 {
        log::warn!(
            "{} frames had mismatched boxes/scores and were truncated",
            report.truncated_frames
        );
    }
    println!(
        "wrote {} frames ({} boxes) to {}",
        report.frames_written,
        report.boxes_written,
        cfg.output_dir.display()
    );
    Ok(())
}
