//! Fixed-rate rule runner
//!
//! This binary:
//! 1. Loads a scene file on a background thread
//! 2. Applies it to the engine on the step thread
//! 3. Steps rules at `TARGET_FPS`, following `loadScene` requests
//!
//! Environment:
//! - `SCENE_FILE` - scene to start with (default `scenes/arena.json`)
//! - `TARGET_FPS` - steps per second (default 20)
//! - `STEPS` - stop after this many steps (default: run forever)
//! - `RULES_CONFIG` - optional JSON file of engine capacities; otherwise
//!   the `RULES_*` variables are used

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use rule_engine::{EngineConfig, ErrorKind, RuleEngine, SceneLoader};
use tracing::{error, info, warn};

/// How long to wait for the first scene before giving up.
const FIRST_SCENE_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rule_runner=info".parse()?)
                .add_directive("rule_engine=info".parse()?),
        )
        .init();

    let config = load_config()?;
    info!(?config, "Starting rule runner");

    let scene_file = std::env::var("SCENE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("scenes/arena.json"));

    let target_fps: f64 = std::env::var("TARGET_FPS")
        .ok()
        .and_then(|p| p.parse().ok())
        .filter(|fps: &f64| *fps > 0.0)
        .unwrap_or(20.0);

    let max_steps: Option<u64> = std::env::var("STEPS").ok().and_then(|p| p.parse().ok());

    let mut engine = RuleEngine::new(config);
    let loader = SceneLoader::spawn().wrap_err("failed to start scene loader")?;

    // The first scene is loaded before stepping starts.
    loader.request(&scene_file);
    let first = loader
        .wait(FIRST_SCENE_TIMEOUT)
        .ok_or_else(|| eyre::eyre!("timed out loading {}", scene_file.display()))?
        .wrap_err("failed to load first scene")?;
    let mut current_scene = first.source.clone();
    engine.apply_scene(first);

    let target_delta = Duration::from_secs_f64(1.0 / target_fps);
    let mut last = Instant::now();

    loop {
        let start = Instant::now();

        // Scenes prepared in the background are applied between steps.
        while let Some(result) = loader.poll() {
            match result {
                Ok(scene) => {
                    current_scene = scene.source.clone();
                    engine.apply_scene(scene);
                }
                Err(e) => error!("{e}"),
            }
        }

        let delta_time = start.duration_since(last).as_secs_f64();
        last = start;
        let report = engine.step(delta_time);

        if let Some(request) = &report.scene_request {
            let path = resolve_scene(&current_scene, request);
            info!(path = %path.display(), "scene change requested");
            loader.request(path);
        }

        if engine.steps().is_multiple_of(u64::from(target_fps.max(1.0) as u32)) {
            info!(
                step = engine.steps(),
                rules = engine.rules().len(),
                entities = engine.store().active_count(),
                written = report.entities_written,
                "tick"
            );
        }

        if max_steps.is_some_and(|max| engine.steps() >= max) {
            break;
        }

        // Sleep to maintain target FPS
        let elapsed = start.elapsed();
        if elapsed < target_delta {
            std::thread::sleep(target_delta - elapsed);
        }
    }

    let diagnostics = engine.diagnostics();
    for kind in ErrorKind::ALL {
        let count = diagnostics.count(kind);
        if count > 0 {
            warn!(kind = kind.as_str(), count, "diagnostics reported");
        }
    }
    info!(steps = engine.steps(), "Shutting down...");

    Ok(())
}

/// Engine capacities from `RULES_CONFIG`, or from `RULES_*` variables.
fn load_config() -> eyre::Result<EngineConfig> {
    let Ok(path) = std::env::var("RULES_CONFIG") else {
        return Ok(EngineConfig::from_env());
    };
    let text = std::fs::read_to_string(&path).wrap_err_with(|| format!("failed to read {path}"))?;
    EngineConfig::from_json(&text).wrap_err_with(|| format!("failed to parse {path}"))
}

/// Scene requests are relative to the scene that made them.
fn resolve_scene(current: &Path, request: &str) -> PathBuf {
    let request = Path::new(request);
    if request.is_absolute() {
        return request.to_path_buf();
    }
    current
        .parent()
        .map_or_else(|| request.to_path_buf(), |dir| dir.join(request))
}
