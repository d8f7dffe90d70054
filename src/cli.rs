// ============================================================================
// RoomVis CLI — headless visualization via command-line arguments
// ============================================================================
//
// Usage examples:
//   RoomVis -i room.jpg -m "masks/*.png" --select 0 --select 2 -t brick.jpg -o out.png
//   RoomVis -i room.jpg -m "masks/*.png" --lasso "10,10 300,20 280,200" -t oak.png -o out.jpg
//   RoomVis -i room.jpg -m m.png --wand 120,340,25 --display 400x300 -t tile.png -o out.png
//
// Every edit goes through the same `Session` API an interactive front end
// uses.  Compositing runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use crate::assets::{EngineSettings, TextureRef};
use crate::components::tools::ToolOutcome;
use crate::io::{encode_and_write, load_image, SaveFormat};
use crate::ops::ai::PrecomputedSegmenter;
use crate::ops::magic_wand::DEFAULT_TOLERANCE;
use crate::project::Session;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// RoomVis headless surface visualizer.
#[derive(Parser, Debug)]
#[command(
    name = "RoomVis",
    about = "Composite a material texture onto selected surfaces of a room photo",
    long_about = "Load a room photo and its surface masks, select or draw a region,\n\
                  and composite a material texture into it with perspective.\n\n\
                  Example:\n  \
                  RoomVis -i room.jpg -m \"masks/*.png\" --select 0 -t brick.jpg -o out.png"
)]
pub struct CliArgs {
    /// Room photo.
    #[arg(short, long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Surface mask file(s). Glob patterns accepted; matches are sorted so
    /// indices are stable.
    #[arg(short, long, num_args = 1.., value_name = "MASK")]
    pub masks: Vec<String>,

    /// Catalog mask index to select (repeatable).
    #[arg(long = "select", value_name = "INDEX")]
    pub select: Vec<usize>,

    /// Material texture file.
    #[arg(short, long, value_name = "TEXTURE")]
    pub texture: PathBuf,

    /// Output file; format inferred from the extension (png, jpg, webp, bmp).
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Composite opacity, 0.0 to 1.0. Defaults to the saved settings.
    #[arg(long, value_name = "0-1")]
    pub opacity: Option<f32>,

    /// Feather radius in pixels.
    #[arg(long, value_name = "PX")]
    pub feather: Option<u32>,

    /// Use the mask bounding box instead of a fitted perspective quad.
    #[arg(long)]
    pub no_perspective: bool,

    /// Lasso polygon, space-separated "x,y" vertices (display space).
    /// Drawing replaces any --select masks.
    #[arg(long, value_name = "\"x,y x,y x,y\"")]
    pub lasso: Option<String>,

    /// Magic wand seed with optional tolerance: "x,y" or "x,y,tol".
    #[arg(long, value_name = "x,y[,tol]")]
    pub wand: Option<String>,

    /// Size the image is displayed at, for mapping tool coordinates: "WxH".
    #[arg(long, value_name = "WxH")]
    pub display: Option<String>,

    /// Write a session snapshot next to the result.
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// JPEG / WEBP quality (1–100).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// Echo log lines to stderr and print timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the pipeline and return an OS exit code.
/// `0` = output written, `1` = anything failed.
pub fn run(args: CliArgs) -> ExitCode {
    crate::logger::set_echo(args.verbose);
    let started = Instant::now();
    match run_session(&args) {
        Ok(()) => {
            if args.verbose {
                println!(
                    "→ {} ({:.0}ms)",
                    args.output.display(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            crate::log_err!("CLI: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

fn run_session(args: &CliArgs) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let image = load_image(&args.input).map_err(|e| format!("load failed: {}", e))?;
    let mask_paths = resolve_inputs(&args.masks);
    if mask_paths.is_empty() {
        return Err("no mask files matched the given pattern(s)".into());
    }
    let segmenter =
        PrecomputedSegmenter::from_files(&mask_paths).map_err(|e| format!("mask load failed: {}", e))?;
    let texture = TextureRef::from_file(&args.texture).map_err(|e| format!("texture load failed: {}", e))?;

    let mut settings = EngineSettings::load();
    if let Some(f) = args.feather {
        settings.feather_radius = f;
    }
    if args.no_perspective {
        settings.perspective = false;
    }
    let opacity = args.opacity.unwrap_or(settings.opacity);

    let image_ref = args.input.display().to_string();
    let mut session = Session::with_settings(image, image_ref, Arc::new(segmenter), settings);

    // -- Step 2: Analyze + select ----------------------------------------
    let count = session.analyze().map_err(|e| e.to_string())?;
    if args.verbose {
        println!("{} mask(s) loaded from {} file(s)", count, mask_paths.len());
    }
    if let Some(display) = &args.display {
        let (w, h) = parse_display(display)?;
        session.set_display_size(w, h);
    }
    for &index in &args.select {
        session.select_mask(index).map_err(|e| e.to_string())?;
    }

    // -- Step 3: Custom edits --------------------------------------------
    if let Some(lasso) = &args.lasso {
        let points = parse_points(lasso)?;
        report(session.apply_lasso(points).map_err(|e| e.to_string())?, "lasso", args.verbose);
    }
    if let Some(wand) = &args.wand {
        let (seed, tolerance) = parse_wand(wand)?;
        report(session.apply_magic_wand(seed, tolerance).map_err(|e| e.to_string())?, "wand", args.verbose);
    }

    // -- Step 4: Composite + save ----------------------------------------
    let result = session.composite(&texture, opacity).map_err(|e| e.to_string())?;
    let format = SaveFormat::from_path(&args.output).unwrap_or_default();
    encode_and_write(&result, &args.output, format, args.quality).map_err(|e| format!("save failed: {}", e))?;

    if let Some(path) = &args.snapshot {
        session.save_snapshot(path).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn report(outcome: ToolOutcome, what: &str, verbose: bool) {
    if !verbose {
        return;
    }
    match outcome {
        ToolOutcome::Changed(_) => println!("{}: applied", what),
        ToolOutcome::NoOp => println!("{}: nothing to do", what),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a sorted, deduplicated list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched: Vec<PathBuf> = entries.flatten().collect();
                if matched.is_empty() {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
                matched.sort();
                for entry in matched {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn parse_point(s: &str) -> Result<(f32, f32), String> {
    let (x, y) = s.split_once(',').ok_or_else(|| format!("expected \"x,y\", got '{}'", s))?;
    let x: f32 = x.trim().parse().map_err(|_| format!("bad x coordinate in '{}'", s))?;
    let y: f32 = y.trim().parse().map_err(|_| format!("bad y coordinate in '{}'", s))?;
    Ok((x, y))
}

/// `"x,y x,y x,y"` → vertices.
fn parse_points(s: &str) -> Result<Vec<(f32, f32)>, String> {
    s.split_whitespace().map(parse_point).collect()
}

/// `"x,y"` or `"x,y,tol"`.
fn parse_wand(s: &str) -> Result<((f32, f32), f32), String> {
    let parts: Vec<&str> = s.split(',').collect();
    match parts.as_slice() {
        [x, y] => Ok((parse_point(&format!("{},{}", x, y))?, DEFAULT_TOLERANCE)),
        [x, y, tol] => {
            let tol: f32 = tol.trim().parse().map_err(|_| format!("bad tolerance in '{}'", s))?;
            Ok((parse_point(&format!("{},{}", x, y))?, tol))
        }
        _ => Err(format!("expected \"x,y[,tol]\", got '{}'", s)),
    }
}

/// `"WxH"` → display size.
fn parse_display(s: &str) -> Result<(f32, f32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected \"WxH\", got '{}'", s))?;
    let w: f32 = w.trim().parse().map_err(|_| format!("bad width in '{}'", s))?;
    let h: f32 = h.trim().parse().map_err(|_| format!("bad height in '{}'", s))?;
    if !(w > 0.0 && h > 0.0) {
        return Err(format!("display size must be positive, got '{}'", s));
    }
    Ok((w, h))
}
