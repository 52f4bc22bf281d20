//! Scene files and background loading.
//!
//! Reading and compiling a scene is pure, so it runs on a worker thread.
//! The result crosses back over a channel as a [`PreparedScene`] and is
//! applied on the step thread by [`RuleEngine::apply_scene`], the only
//! place that touches the store or registries.
//!
//! [`RuleEngine::apply_scene`]: crate::RuleEngine::apply_scene

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fs, io};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::RuleError;
use crate::rules::{CompiledRule, RuleDef};

/// Pending requests and finished scenes held by the loader channels.
const QUEUE_DEPTH: usize = 4;

/// A scene file as authored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneFile {
    /// Entity documents, written through the converter on load.
    pub entities: Vec<Value>,
    /// Rules for the scene partition. Each entry is decoded on its own so
    /// one malformed rule does not fail the file.
    pub rules: Vec<Value>,
    /// Rules added to the global partition.
    pub global_rules: Vec<Value>,
}

/// Failure to read or parse a scene file.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read scene {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse scene {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A scene compiled and ready to apply.
#[derive(Debug, Clone)]
pub struct PreparedScene {
    pub source: PathBuf,
    pub entities: Vec<Value>,
    pub rules: Vec<CompiledRule>,
    pub global_rules: Vec<CompiledRule>,
    /// Rules that failed to compile, reported when the scene is applied.
    pub errors: Vec<RuleError>,
}

impl PreparedScene {
    /// Decode and compile every rule in `file`. A rule that fails is kept
    /// as an error and the rest still compile.
    #[must_use]
    pub fn prepare(source: impl Into<PathBuf>, file: SceneFile) -> Self {
        let mut errors = Vec::new();
        let mut compile = |section: &str, defs: Vec<Value>| -> Vec<CompiledRule> {
            defs.into_iter()
                .enumerate()
                .filter_map(|(i, def)| {
                    serde_json::from_value::<RuleDef>(def)
                        .map_err(|e| RuleError::syntax(format!("{section}[{i}]"), e))
                        .and_then(|def| CompiledRule::compile(&def))
                        .map_err(|e| errors.push(e))
                        .ok()
                })
                .collect()
        };
        let rules = compile("rules", file.rules);
        let global_rules = compile("globalRules", file.global_rules);

        Self {
            source: source.into(),
            entities: file.entities,
            rules,
            global_rules,
            errors,
        }
    }

    /// Parse scene JSON text.
    ///
    /// # Errors
    ///
    /// [`SceneError::Json`] if the text is not a scene object.
    pub fn from_json(source: impl Into<PathBuf>, text: &str) -> Result<Self, SceneError> {
        let source = source.into();
        match serde_json::from_str::<SceneFile>(text) {
            Ok(file) => Ok(Self::prepare(source, file)),
            Err(e) => Err(SceneError::Json {
                path: source,
                source: e,
            }),
        }
    }

    /// Read and compile a scene file.
    ///
    /// # Errors
    ///
    /// [`SceneError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let text = fs::read_to_string(path).map_err(|e| SceneError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(path, &text)
    }
}

/// Loads scenes on a worker thread.
pub struct SceneLoader {
    requests: Option<Sender<PathBuf>>,
    results: Option<Receiver<Result<PreparedScene, SceneError>>>,
    worker: Option<JoinHandle<()>>,
}

impl SceneLoader {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn() -> io::Result<Self> {
        let (request_tx, request_rx) = bounded::<PathBuf>(QUEUE_DEPTH);
        let (result_tx, result_rx) = bounded(QUEUE_DEPTH);

        let worker = thread::Builder::new()
            .name("scene-loader".into())
            .spawn(move || {
                for path in request_rx {
                    debug!(path = %path.display(), "loading scene");
                    let result = PreparedScene::load(&path);
                    if let Err(e) = &result {
                        error!("{e}");
                    }
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests: Some(request_tx),
            results: Some(result_rx),
            worker: Some(worker),
        })
    }

    /// Queue a scene for loading. Returns `false` if the queue is full or
    /// the worker has stopped.
    pub fn request(&self, path: impl Into<PathBuf>) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        match requests.try_send(path.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                error!(path = %path.display(), "scene queue full, request dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// A finished scene, if one is ready. Never blocks.
    pub fn poll(&self) -> Option<Result<PreparedScene, SceneError>> {
        self.results.as_ref()?.try_recv().ok()
    }

    /// Wait up to `timeout` for a finished scene.
    pub fn wait(&self, timeout: Duration) -> Option<Result<PreparedScene, SceneError>> {
        match self.results.as_ref()?.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for SceneLoader {
    fn drop(&mut self) {
        // Closing both channels ends the worker loop, even mid-handover.
        self.requests.take();
        self.results.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("scene loader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_prepare_keeps_good_rules() {
        let file: SceneFile = serde_json::from_value(json!({
            "entities": [{"id": "door", "tags": ["door"]}],
            "rules": [
                {"from": "#door", "do": {"deactivate": true}},
                {"from": "#", "do": {"deactivate": true}},
            ],
            "globalRules": [{"from": "@player", "do": {"mut": []}}],
        }))
        .unwrap();

        let scene = PreparedScene::prepare("inline", file);
        assert_eq!(scene.entities.len(), 1);
        assert_eq!(scene.rules.len(), 1);
        assert_eq!(scene.global_rules.len(), 1);
        assert_eq!(scene.errors.len(), 1);
        assert_eq!(scene.errors[0].kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_malformed_rule_drops_only_itself() {
        let scene = PreparedScene::from_json(
            "inline",
            r##"{"rules": [
                {"from": "#t", "do": {"deactivate": true}},
                {"from": "#t"},
                {"from": 5, "do": {"deactivate": true}}
            ]}"##,
        )
        .unwrap();

        assert_eq!(scene.rules.len(), 1);
        assert_eq!(scene.errors.len(), 2);
        assert!(scene.errors.iter().all(|e| e.kind() == ErrorKind::Syntax));
        assert!(scene.errors[0].to_string().contains("rules[1]"));
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let scene = PreparedScene::from_json("empty", "{}").unwrap();
        assert!(scene.entities.is_empty());
        assert!(scene.rules.is_empty());
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(matches!(
            PreparedScene::from_json("bad", "[1, 2"),
            Err(SceneError::Json { .. })
        ));
    }

    #[test]
    fn test_loader_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r##"{{"rules": [{{"from": "#a", "do": {{"deactivate": true}}}}]}}"##).unwrap();

        let loader = SceneLoader::spawn().unwrap();
        assert!(loader.request(file.path()));
        let scene = loader.wait(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(scene.source, file.path());
        assert_eq!(scene.rules.len(), 1);
    }

    #[test]
    fn test_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SceneLoader::spawn().unwrap();
        assert!(loader.request(dir.path().join("missing.json")));
        let result = loader.wait(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(SceneError::Io { .. })));
    }
}
