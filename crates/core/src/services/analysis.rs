use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::policy::{run_detectors, DetectionMode, DetectionOutcome};
use crate::db::{DbResult, ProjectDb, DEFAULT_CFG_TIMEOUT_SECS};
use crate::model::{BinaryArtifact, BinaryImage, ControlFlowGraph, ImageError};

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("{0}")]
    Load(#[from] ImageError),
    #[error("Generation of CFG took too long (limit {}s)", .0.as_secs())]
    Timeout(Duration),
    #[error("CFG construction failed: {0}")]
    Build(String),
    #[error("CFG construction canceled")]
    Canceled,
}

/// Shared flag a CFG builder polls between functions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(CfgError::Canceled)` once the token has been tripped.
    pub fn check(&self) -> Result<(), CfgError> {
        if self.is_canceled() {
            Err(CfgError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Source of loaded images and control-flow graphs (e.g. Capstone + goblin).
pub trait CfgProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Version of the underlying engine, if it reports one.
    fn version(&self) -> Option<String> {
        None
    }

    fn load(&self, path: &Path) -> Result<BinaryImage, CfgError> {
        Ok(BinaryImage::open(path)?)
    }

    /// Build the CFG of `image`. Long-running builders should call
    /// [`CancelToken::check`] at function boundaries.
    fn build_cfg(
        &self,
        image: &BinaryImage,
        cancel: &CancelToken,
    ) -> Result<ControlFlowGraph, CfgError>;
}

/// Registry for CFG providers; callers select by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn CfgProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new() }
    }

    pub fn register<P: CfgProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.providers.insert(provider.name().to_string(), Box::new(provider));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn CfgProvider> {
        self.providers.get(name).map(|p| &**p)
    }

    /// Return a sorted list of registered provider names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Loads symbols but never produces a CFG. Enough for multi-module checks.
pub struct SymbolsOnlyProvider;

impl CfgProvider for SymbolsOnlyProvider {
    fn name(&self) -> &'static str {
        "symbols-only"
    }

    fn build_cfg(
        &self,
        _image: &BinaryImage,
        _cancel: &CancelToken,
    ) -> Result<ControlFlowGraph, CfgError> {
        Err(CfgError::Build("the symbols-only provider does not disassemble".into()))
    }
}

/// Name of the provider used when neither the CLI nor the config picks one.
pub fn default_provider_name() -> &'static str {
    if cfg!(feature = "capstone-backend") {
        "capstone"
    } else {
        "symbols-only"
    }
}

/// Registry populated with every provider compiled into this build.
pub fn default_provider_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(SymbolsOnlyProvider);
    #[cfg(feature = "capstone-backend")]
    {
        registry.register(crate::services::backends::CapstoneBackend);
    }
    registry
}

/// Build a CFG on a worker thread, giving up after `timeout`.
///
/// On expiry the cancel token is tripped and this call returns once the worker
/// reaches its next cancellation point.
pub fn build_cfg_with_watchdog(
    provider: &dyn CfgProvider,
    image: &BinaryImage,
    timeout: Option<Duration>,
) -> Result<ControlFlowGraph, CfgError> {
    let cancel = CancelToken::new();
    let Some(limit) = timeout else {
        return provider.build_cfg(image, &cancel);
    };
    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        let worker_cancel = cancel.clone();
        scope.spawn(move || {
            let _ = tx.send(provider.build_cfg(image, &worker_cancel));
        });
        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                Err(CfgError::Timeout(limit))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(CfgError::Build("CFG worker exited without a result".into()))
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub mode: DetectionMode,
    /// `None` disables the watchdog.
    pub cfg_timeout: Option<Duration>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Standard,
            cfg_timeout: Some(Duration::from_secs(DEFAULT_CFG_TIMEOUT_SECS)),
        }
    }
}

/// Loads one binary, builds its CFG and runs the detectors on its artifact.
pub struct BinaryChecker<'a> {
    pub provider: &'a dyn CfgProvider,
    pub options: AnalysisOptions,
}

impl<'a> BinaryChecker<'a> {
    pub fn new(provider: &'a dyn CfgProvider, options: AnalysisOptions) -> Self {
        Self { provider, options }
    }

    /// Analyze `artifact.path`. Load and CFG failures are appended to the
    /// artifact's error text and returned; no detector runs in that case.
    pub fn check(&self, artifact: &mut BinaryArtifact) -> Result<DetectionOutcome, CfgError> {
        let image = self.provider.load(&artifact.path).map_err(|e| {
            warn!("{}: could not load binary: {e}", artifact.path.display());
            artifact.push_error(format!("ERROR: Could not load binary because of {e}"));
            e
        })?;
        self.check_image(&image, artifact)
    }

    /// Same as [`check`](Self::check) for an image that is already loaded.
    pub fn check_image(
        &self,
        image: &BinaryImage,
        artifact: &mut BinaryArtifact,
    ) -> Result<DetectionOutcome, CfgError> {
        let cfg = if self.options.mode.needs_cfg() {
            let cfg = build_cfg_with_watchdog(self.provider, image, self.options.cfg_timeout)
                .map_err(|e| {
                    warn!("{}: CFG generation failed: {e}", artifact.path.display());
                    artifact.push_error(format!("ERROR: Could not generate CFG because of {e}"));
                    e
                })?;
            debug!(
                "{}: CFG with {} functions, {} blocks",
                artifact.name,
                cfg.function_count(),
                cfg.block_count()
            );
            Some(cfg)
        } else {
            None
        };

        let outcome = run_detectors(image, cfg.as_ref(), self.options.mode, artifact);
        info!(
            "{}: multi_cfi={} single_cfi={} scs={}",
            artifact.name,
            artifact.multi_cfi(),
            artifact.single_cfi(),
            artifact.scs()
        );
        Ok(outcome)
    }
}

/// `<parent>/lib/<rest>` and `<parent>/lib64/<rest>` for a path under a
/// `lib` directory, where `<parent>` is the directory containing `lib`.
pub fn lib32_paths(path: &Path) -> Option<(String, String)> {
    let text = path.to_string_lossy().replace('\\', "/");
    let parts: Vec<&str> = text.split("/lib/").collect();
    let [head, rest] = parts.as_slice() else {
        return None;
    };
    let prefix: Vec<&str> = head.split('/').collect();
    if prefix.len() < 2 {
        return None;
    }
    let parent = prefix[prefix.len() - 1];
    let join = |dir: &str| {
        if parent.is_empty() {
            format!("{dir}/{rest}")
        } else {
            format!("{parent}/{dir}/{rest}")
        }
    };
    Some((join("lib"), join("lib64")))
}

/// Propagate cross-DSO CFI from a 64-bit library to its 32-bit twin, which the
/// symbol-based checks cannot see. Returns true when the 32-bit row was updated.
pub fn fix_lib32(db: &ProjectDb, artifact: &BinaryArtifact) -> DbResult<bool> {
    let Some((path32, path64)) = lib32_paths(&artifact.path) else {
        debug!("{}: not under a lib directory", artifact.path.display());
        return Ok(false);
    };
    let subimage = artifact.subimage.as_str();
    if db.has_multi_cfi_by_path_suffix(subimage, &path32)? {
        return Ok(false);
    }
    if db.exists_by_path_suffix(subimage, &path64)?
        && db.has_multi_cfi_by_path_suffix(subimage, &path64)?
    {
        info!("{}: marking multi-module CFI from {path64}", artifact.name);
        return db.mark_lib32(subimage, &artifact.id);
    }
    Ok(false)
}
