//! # Transit Display Application Entry Point
//!
//! This binary wires the synchronization engine to its collaborators and
//! runs the cycle loop. It supports both production mode (driving a real
//! panel behind the `PanelDriver` trait) and development mode (ASCII dump
//! of the frame buffer to stdout, no hardware needed).
//!
//! Flags:
//! - `--stdout` — print an ASCII preview of the frame after every cycle
//! - `--once`   — run a single cycle and exit (useful under cron/systemd
//!   timers and in smoke tests)


use std::env;
use std::thread;

use chrono::Utc;
use transit_display_lib::config::Config;
use transit_display_lib::duty::DutyCycleController;
use transit_display_lib::panel::MemoryPanel;
use transit_display_lib::scheduler::EngineState;
use transit_display_lib::source::HttpDataSource;
use transit_display_lib::store::FileStore;
use transit_display_lib::template::SystemMemory;

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    // Development mode: render to stdout for testing without hardware
    let development_mode = env::args().any(|arg| arg == "--stdout");
    let run_once = env::args().any(|arg| arg == "--once");

    let config = Config::load();
    eprintln!(
        "🚆 Transit display starting: {} as {}, {}x{} @ {}bpp",
        config.server.base_url,
        config.server.device_id,
        config.display.width,
        config.display.height,
        config.display.bits_per_pixel
    );

    let mut store = FileStore::open(&config.store.state_path);
    let mut state = EngineState::new(&config, &store);
    let mut duty = DutyCycleController::new(&config.refresh, Utc::now());
    let probe = SystemMemory;

    let mut source = HttpDataSource::new(&config.server)?;

    // The in-memory panel stands in for the real driver; swapping in a
    // hardware implementation of PanelDriver is the only change needed to
    // drive glass.
    let mut panel = MemoryPanel::new(
        config.display.width,
        config.display.height,
        config.display.depth(),
    );

    loop {
        let force_full = duty.force_full(Utc::now());
        let outcome = state.run_cycle(&mut source, &mut panel, &mut store, &probe, force_full);

        match &outcome {
            Ok(report) => {
                if development_mode {
                    println!("{}", panel.dump_ascii());
                    println!("decision: {}", report.decision);
                }
            }
            Err(error) => {
                // Network errors are expected and handled gracefully; the
                // controller backs off and we try again.
                eprintln!("Cycle failed: {}", error);
            }
        }

        duty.record_outcome(&outcome, Utc::now());

        if run_once {
            break;
        }
        thread::sleep(duty.next_sleep());
    }

    Ok(())
}
