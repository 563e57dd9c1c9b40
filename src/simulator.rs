//! Host build: the stroke engine against a simulated motor.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;

use ossm_stroke::command::run_console;
use ossm_stroke::engine::{run_loop, SharedEngine, StrokeEngine};
use ossm_stroke::motor::SimulatedMotor;
use ossm_stroke::settings::EngineConfig;

/// Speed in percent for runs started without one.
const DEFAULT_SPEED: f32 = 20.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs stroke patterns against a simulated motor", long_about = None)]
struct Args {
    /// Pattern name, key or menu index
    #[arg(long)]
    pattern: Option<String>,
    /// Speed in percent, 20 unless set here or in the config
    #[arg(long)]
    speed: Option<f32>,
    /// Stroke in percent of the travel
    #[arg(long)]
    stroke: Option<f32>,
    /// Depth in percent of the travel
    #[arg(long)]
    depth: Option<f32>,
    /// Sensation in percent, 50 is neutral
    #[arg(long)]
    sensation: Option<f32>,
    /// Inward strokes to run before exiting
    #[arg(long, default_value_t = 20)]
    strokes: u32,
    /// Travel between the end stops, in motor steps
    #[arg(long, default_value_t = 3000)]
    travel_steps: i32,
    /// Read console commands from stdin until it closes
    #[arg(long)]
    interactive: bool,
    /// JSON engine config to start from; changes are written back
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
}

fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(pattern) = &args.pattern {
        config.pattern = pattern.parse()?;
    }
    let settings = &mut config.settings;
    for (arg, field) in [
        (args.speed, &mut settings.speed),
        (args.stroke, &mut settings.stroke),
        (args.depth, &mut settings.depth),
        (args.sensation, &mut settings.sensation),
    ] {
        if let Some(value) = arg {
            *field = value;
        }
    }

    if !args.interactive && args.speed.is_none() {
        let speed = config.settings.speed;
        config = config.with_running_speed(DEFAULT_SPEED);
        if config.settings.speed != speed {
            log::info!("No speed set, running at {}%", DEFAULT_SPEED);
        }
    }

    let motor = SimulatedMotor::new(args.travel_steps).realtime();
    let mut engine = StrokeEngine::new(Box::new(motor), config)?;
    engine.init_motor()?;
    if !args.interactive {
        engine.start()?;
    }
    let shared: SharedEngine = Arc::new(Mutex::new(Some(Box::new(engine))));

    let console_closed = Arc::new(AtomicBool::new(false));
    if args.interactive {
        let shared = shared.clone();
        let console_closed = console_closed.clone();
        std::thread::spawn(move || {
            run_console(std::io::stdin().lock(), &shared, |_| {
                anyhow::bail!("Only available on the device")
            });
            console_closed.store(true, Ordering::Relaxed);
        });
    }

    let config_path = args.config.clone();
    let strokes = args.strokes;
    let interactive = args.interactive;
    run_loop(
        &shared,
        |config| match &config_path {
            Some(path) => save_config(path, config),
            None => Ok(()),
        },
        |engine| {
            if interactive {
                !console_closed.load(Ordering::Relaxed)
            } else {
                engine.session().strokes < strokes || engine.index() % 2 == 1
            }
        },
    )?;

    let mut engine = shared.lock().unwrap();
    if let Some(engine) = engine.as_mut() {
        engine.stop()?;
        let session = engine.session();
        log::info!(
            "Session: {} strokes, {:.2} m in {:.1} s",
            session.strokes,
            session.distance_meters,
            engine.get_current_state().session_seconds
        );
    }
    Ok(())
}
