//! Kestrel CLI - runs external vision scenarios against the estimator.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kestrel_core::{ReferenceFrame, VisionControl};
use kestrel_sim::{run_scenario, ScenarioConfig, ScenarioResult};
use std::path::PathBuf;
use tracing::info;

/// Public function that can be called from the main binary
pub fn run_cli_main(args: &[&str]) -> Result<()> {
    let args = Args::parse_from(args);
    main_inner(args)
}

#[derive(Parser, Debug)]
#[command(name = "kestrel-cli")]
#[command(about = "External vision aided EKF scenario runner")]
#[command(version)]
pub struct Args {
    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,

    /// Scenario JSON; command line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    // ── Scenario ─────────────────────────────────────────────
    #[arg(long)]
    duration: Option<f64>,

    #[arg(long)]
    settle: Option<f64>,

    #[arg(long, value_enum)]
    frame: Option<FrameArg>,

    /// Vision frame yaw relative to navigation (deg)
    #[arg(long, allow_hyphen_values = true)]
    frame_yaw: Option<f64>,

    /// Truth velocity in the vision frame: N E D
    #[arg(long, num_args = 3, allow_hyphen_values = true)]
    velocity: Option<Vec<f64>>,

    /// Vision channels enabled after settling, e.g. "POSITION | VELOCITY"
    #[arg(long)]
    vision: Option<String>,

    #[arg(long)]
    gnss: bool,

    // ── Sensor options ────────────────────────────────────────
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    noise_scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FrameArg {
    Navigation,
    Local,
}

impl From<FrameArg> for ReferenceFrame {
    fn from(frame: FrameArg) -> Self {
        match frame {
            FrameArg::Navigation => ReferenceFrame::Navigation,
            FrameArg::Local => ReferenceFrame::Local,
        }
    }
}

fn main_inner(args: Args) -> Result<()> {
    println!("Kestrel External Vision Scenario");
    println!("================================\n");

    let scenario = build_scenario(&args)?;
    let result = run_scenario(&scenario)?;
    print_summary(&result);
    write_output(&args, &scenario, &result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------
fn build_scenario(args: &Args) -> Result<ScenarioConfig> {
    let mut cfg = match &args.config {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::default(),
    };

    if let Some(duration) = args.duration {
        cfg.duration_s = duration;
    }
    if let Some(settle) = args.settle {
        cfg.settle_s = settle;
    }
    if let Some(frame) = args.frame {
        cfg.frame = frame.into();
    }
    if let Some(yaw) = args.frame_yaw {
        cfg.frame_yaw_deg = yaw;
    }
    if let Some(v) = &args.velocity {
        if let [n, e, d] = v.as_slice() {
            cfg.vision_velocity = [*n, *e, *d];
        }
    }
    if let Some(flags) = &args.vision {
        cfg.vision_after_settle = parse_vision(flags)?;
    }
    if args.gnss {
        cfg.gnss = true;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if let Some(scale) = args.noise_scale {
        cfg.noise_scale = scale;
    }
    Ok(cfg)
}

fn parse_vision(flags: &str) -> Result<VisionControl> {
    bitflags::parser::from_str::<VisionControl>(flags)
        .with_context(|| format!("invalid vision flags '{flags}'"))
}

fn print_summary(result: &ScenarioResult) {
    let s = &result.summary;
    println!("\nScenario Summary:");
    println!("  Steps:           {}", result.time.len());
    println!("  Velocity resets: {}", s.velocity_resets);
    println!("  Position resets: {}", s.position_resets);
    println!("  Rejected:        {}", s.rejected_samples);
    println!("  Velocity error:  {:.4} m/s", s.final_velocity_error);
    println!("  Position error:  {:.4} m", s.final_position_error);
    println!("  Alignment error: {:.3} deg", s.alignment_error_deg);
    println!("  Local valid:     {}", s.local_position_valid);
    println!("  Global valid:    {}", s.global_position_valid);
    println!("--------------------------------");
}

fn write_output(args: &Args, scenario: &ScenarioConfig, result: &ScenarioResult) -> Result<()> {
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    match args.format {
        OutputFormat::Csv => write_csv(args, result)?,
        OutputFormat::Json => write_series_json(args, result)?,
    }

    let summary = serde_json::json!({
        "scenario": scenario.to_json(),
        "summary": result.summary.to_json(),
    });
    let path = args.output_dir.join("summary.json");
    std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    info!(path = %path.display(), "summary written");
    println!("Summary written to {:?}", path);
    Ok(())
}

fn write_csv(args: &Args, result: &ScenarioResult) -> Result<()> {
    let path = args.output_dir.join("estimates.csv");
    let mut wtr = csv::Writer::from_path(&path)?;

    wtr.write_record([
        "time",
        // Truth
        "true_pos_n",
        "true_pos_e",
        "true_pos_d",
        "true_vel_n",
        "true_vel_e",
        "true_vel_d",
        // Estimates
        "est_pos_n",
        "est_pos_e",
        "est_pos_d",
        "est_vel_n",
        "est_vel_e",
        "est_vel_d",
        "est_roll",
        "est_pitch",
        "est_yaw",
        "align_yaw",
    ])?;

    for i in 0..result.time.len() {
        let (tp, tv) = (result.true_position[i], result.true_velocity[i]);
        let (ep, ev, rpy) = (
            result.position[i],
            result.velocity[i],
            result.orientation_euler[i],
        );
        wtr.write_record(&[
            format!("{:.4}", result.time[i]),
            format!("{:.4}", tp.x),
            format!("{:.4}", tp.y),
            format!("{:.4}", tp.z),
            format!("{:.4}", tv.x),
            format!("{:.4}", tv.y),
            format!("{:.4}", tv.z),
            format!("{:.4}", ep.x),
            format!("{:.4}", ep.y),
            format!("{:.4}", ep.z),
            format!("{:.4}", ev.x),
            format!("{:.4}", ev.y),
            format!("{:.4}", ev.z),
            format!("{:.4}", rpy.x),
            format!("{:.4}", rpy.y),
            format!("{:.4}", rpy.z),
            format!("{:.4}", result.alignment_yaw[i]),
        ])?;
    }

    wtr.flush()?;
    println!("Data written to {:?}", path);
    Ok(())
}

fn write_series_json(args: &Args, result: &ScenarioResult) -> Result<()> {
    let rows: Vec<serde_json::Value> = (0..result.time.len())
        .map(|i| {
            let (p, v) = (result.position[i], result.velocity[i]);
            serde_json::json!({
                "time": result.time[i],
                "position": [p.x, p.y, p.z],
                "velocity": [v.x, v.y, v.z],
                "align_yaw": result.alignment_yaw[i],
            })
        })
        .collect();
    let path = args.output_dir.join("estimates.json");
    std::fs::write(&path, serde_json::to_string(&rows)?)?;
    println!("Data written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = Args::try_parse_from([
            "kestrel-cli",
            "--duration",
            "4.5",
            "--frame",
            "navigation",
            "--frame-yaw",
            "-30",
            "--velocity",
            "1.0",
            "-0.5",
            "0.0",
            "--vision",
            "VELOCITY | HEADING | ALIGNMENT",
        ])
        .unwrap();
        let cfg = build_scenario(&args).unwrap();

        assert_eq!(cfg.duration_s, 4.5);
        assert_eq!(cfg.frame, ReferenceFrame::Navigation);
        assert_eq!(cfg.frame_yaw_deg, -30.0);
        assert_eq!(cfg.vision_velocity, [1.0, -0.5, 0.0]);
        assert_eq!(
            cfg.vision_after_settle,
            VisionControl::VELOCITY | VisionControl::HEADING | VisionControl::ALIGNMENT
        );
        assert!(!cfg.gnss);
    }

    #[test]
    fn test_bad_vision_flags() {
        assert!(parse_vision("POSITION | WHEELS").is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::try_parse_from(["kestrel-cli", "--config", "/nonexistent/scenario.json"])
            .unwrap();
        assert!(build_scenario(&args).is_err());
    }
}
