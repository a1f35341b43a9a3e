// ============================================================================
// Moodboard CLI — headless board rendering via command-line arguments
// ============================================================================
//
// Usage examples:
//   moodboard --input board.json --output collage.png
//   moodboard -i board.json                         (output name derived)
//   moodboard -i board.json -o out.png --width 1920 --height 1080
//
// No GUI is opened in CLI mode. Rendering runs synchronously on the current
// process (rayon still parallelises the compositing rows).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::Rgba;

use crate::persist::{export_file_name, import_document};
use crate::render::{SourceCache, compose, encode_png};
use crate::settings::AppSettings;

/// Moodboard headless renderer.
///
/// Flatten an exported board document to a PNG without opening the GUI.
#[derive(Parser, Debug)]
#[command(
    name = "moodboard",
    about = "Moodboard headless board renderer",
    long_about = "Render an exported board JSON document (canvas-state-*.json) to a flat\n\
                  PNG without opening the GUI.\n\n\
                  Example:\n  \
                  moodboard --input board.json --output collage.png"
)]
pub struct CliArgs {
    /// Board document to render (the JSON produced by Export JSON).
    #[arg(short, long, value_name = "BOARD.json")]
    pub input: PathBuf,

    /// Output PNG path. Defaults to `canvas-export-<date>.png` next to the
    /// input.
    #[arg(short, long, value_name = "FILE.png")]
    pub output: Option<PathBuf>,

    /// Surface width in pixels (defaults to the saved settings value).
    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    /// Surface height in pixels (defaults to the saved settings value).
    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    /// Background colour as "r,g,b,a" (0-255 each).
    #[arg(long, value_name = "R,G,B,A")]
    pub background: Option<String>,

    /// Print per-step timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// True when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--input" || a == "-i")
    }
}

/// Run the headless render and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = AppSettings::load();
    let width = args.width.unwrap_or(settings.board_width);
    let height = args.height.unwrap_or(settings.board_height);

    let background = match args.background.as_deref().map(parse_background) {
        None => Rgba(settings.background),
        Some(Some(c)) => c,
        Some(None) => {
            eprintln!("error: --background expects \"r,g,b,a\" with values 0-255.");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();

    let json = match std::fs::read_to_string(&args.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read '{}': {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let elements = match import_document(&json) {
        Ok(elements) => elements,
        Err(e) => {
            eprintln!("error: '{}' is not a valid board document: {}", args.input.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        println!(
            "loaded {} element(s) from {}",
            elements.len(),
            args.input.display()
        );
    }

    let mut cache = SourceCache::default();
    let surface = match compose(&elements, &mut cache, width, height, background) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("error: render failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let png = match encode_png(&surface) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let output = args.output.unwrap_or_else(|| {
        let parent = args.input.parent().unwrap_or(std::path::Path::new("."));
        parent.join(export_file_name("canvas-export", "png"))
    });
    if let Err(e) = std::fs::write(&output, png) {
        eprintln!("error: could not write '{}': {}", output.display(), e);
        return ExitCode::FAILURE;
    }

    if args.verbose {
        println!(
            "→ {} ({}×{}, {:.0}ms)",
            output.display(),
            width,
            height,
            start.elapsed().as_secs_f64() * 1000.0
        );
    } else {
        println!("→ {}", output.display());
    }
    ExitCode::SUCCESS
}

/// Parse "r,g,b,a" into a pixel. None on any malformed part.
fn parse_background(s: &str) -> Option<Rgba<u8>> {
    let parts: Vec<_> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }
    Some(Rgba([
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
        parts[3].parse().ok()?,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_parsing() {
        assert_eq!(
            parse_background("255, 0, 10,128"),
            Some(Rgba([255, 0, 10, 128]))
        );
        assert_eq!(parse_background("1,2,3"), None);
        assert_eq!(parse_background("1,2,3,300"), None);
        assert_eq!(parse_background("red"), None);
    }
}
