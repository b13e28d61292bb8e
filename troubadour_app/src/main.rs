//! Troubadour - Headless Virtual Audio Mixer
//!
//! Hosts the engine and serves the command surface as newline-delimited
//! JSON on stdin/stdout: one request per line in, one response per line
//! out. Engine events (device errors, preset-directory changes) are
//! interleaved as `{"event": ...}` lines. Logs go to stderr.
//!
//! Exit codes: 0 on clean shutdown (stdin EOF), non-zero when
//! initialization fails - audio subsystem unavailable, config directory
//! unwritable, malformed config document.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use troubadour_core::{
    default_config_path, default_preset_dir, AudioEngine, Controller, MixerDocument, PresetStore,
    PresetWatcher, Request, Response,
};

fn main() -> ExitCode {
    // Logs to stderr; stdout is the response channel
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let config_path = default_config_path()?;
    let document = MixerDocument::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let engine_config = document.engine_config()?;

    let engine = AudioEngine::start(engine_config.clone()).context("starting audio engine")?;
    engine
        .load_state(document.mixer)
        .context("applying persisted mixer state")?;

    let preset_dir = engine_config
        .preset_directory
        .clone()
        .map(Ok)
        .unwrap_or_else(default_preset_dir)?;
    let presets = PresetStore::open(preset_dir).context("opening preset directory")?;
    let watcher =
        PresetWatcher::spawn(presets.dir(), engine.event_hook()).context("watching presets")?;

    // Engine events interleave with responses as tagged lines; println!
    // locks stdout per line, so lines never shear
    let events = engine.events();
    let event_thread = thread::Builder::new()
        .name("troubadour-events".into())
        .spawn(move || {
            for event in events.iter() {
                match serde_json::to_string(&event) {
                    Ok(json) => println!("{{\"event\":{json}}}"),
                    Err(err) => error!("encoding event: {err}"),
                }
            }
        })
        .context("spawning event forwarder")?;

    let controller = Arc::new(Controller::new(engine, presets, config_path));
    let (autosave_stop, autosave) =
        spawn_autosave(&controller, engine_config.auto_save_interval_seconds)?;

    info!("ready; reading commands from stdin");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match Request::from_json(&line) {
            Ok(request) => controller.dispatch(request),
            Err(err) => Response::Error {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        println!("{}", response.to_json());
    }

    // Stdin closed: shut down in dependency order so the event stream
    // drains before the forwarder joins
    let _ = autosave_stop.send(());
    if let Some(handle) = autosave {
        let _ = handle.join();
    }
    drop(controller);
    drop(watcher);
    let _ = event_thread.join();
    Ok(())
}

/// Periodically persist the live state to the config document. An
/// interval of zero disables auto-save.
fn spawn_autosave(
    controller: &Arc<Controller>,
    interval_seconds: u32,
) -> Result<(mpsc::Sender<()>, Option<JoinHandle<()>>)> {
    let (stop_sender, stop_receiver) = mpsc::channel::<()>();
    if interval_seconds == 0 {
        return Ok((stop_sender, None));
    }

    let controller = Arc::clone(controller);
    let period = Duration::from_secs(interval_seconds as u64);
    let handle = thread::Builder::new()
        .name("troubadour-autosave".into())
        .spawn(move || {
            while let Err(mpsc::RecvTimeoutError::Timeout) = stop_receiver.recv_timeout(period) {
                if let Response::Error { message, .. } = controller.dispatch(Request::SaveConfig) {
                    warn!("auto-save failed: {message}");
                }
            }
        })
        .context("spawning auto-save thread")?;

    Ok((stop_sender, Some(handle)))
}
