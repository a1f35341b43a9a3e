#![allow(clippy::too_many_arguments)]

use std::process::ExitCode;

use eframe::egui;
use moodboard::app::BoardApp;
use moodboard::{cli, log_err, logger};

fn main() -> ExitCode {
    // -- CLI / headless mode ---------------------------------------------
    // Routed before any window is created so `moodboard -i board.json` works
    // from scripts and CI.
    if cli::CliArgs::is_cli_mode() {
        use clap::Parser;
        let args = cli::CliArgs::parse();
        return cli::run(args);
    }

    // -- GUI mode -----------------------------------------------------

    // Initialize session log (overwrites previous session log)
    logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1440.0, 900.0])
            .with_title("Moodboard"),
        ..Default::default()
    };

    match eframe::run_native(
        "Moodboard",
        options,
        Box::new(|cc| Box::new(BoardApp::new(cc))),
    ) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("eframe failed to start: {}", e);
            eprintln!("error: could not start the window: {}", e);
            ExitCode::FAILURE
        }
    }
}
