//! runtime — ONNX Runtime discovery and session construction

use anyhow::{Context, Result};
use ort::execution_providers as ep;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
const ORT_LIB_NAME: &str = "libonnxruntime.dylib";
#[cfg(target_os = "windows")]
const ORT_LIB_NAME: &str = "onnxruntime.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const ORT_LIB_NAME: &str = "libonnxruntime.so";

/// Resolve and set ORT_DYLIB_PATH at runtime when it is missing or invalid.
///
/// Priority order:
/// 1) Existing ORT_DYLIB_PATH (if file exists)
/// 2) models/onnxruntime*/lib/<lib> near current exe/cwd
/// 3) models/<lib> near current exe/cwd
pub fn configure_ort_dylib() {
    if let Some(existing) = std::env::var_os("ORT_DYLIB_PATH") {
        let existing_path = PathBuf::from(existing);
        if existing_path.is_file() {
            tracing::info!(path = %existing_path.display(), "using ORT_DYLIB_PATH from environment");
            return;
        }
        tracing::warn!(
            path = %existing_path.display(),
            "ORT_DYLIB_PATH is set but file does not exist; attempting auto-discovery"
        );
    }

    for candidate in ort_candidates() {
        if candidate.is_file() {
            // SAFETY: called once from the CLI main thread before any ORT
            // session exists, so no other thread reads the environment.
            unsafe {
                std::env::set_var("ORT_DYLIB_PATH", &candidate);
            }
            tracing::info!(path = %candidate.display(), "configured ORT_DYLIB_PATH");
            return;
        }
    }

    tracing::debug!("no bundled ONNX Runtime found; relying on the default loader");
}

fn ort_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }

    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(Path::to_path_buf);
        for _ in 0..5 {
            let Some(d) = dir else {
                break;
            };
            roots.push(d.clone());
            dir = d.parent().map(Path::to_path_buf);
        }
    }

    roots
        .into_iter()
        .flat_map(|root| {
            [
                root.join("models/onnxruntime/lib").join(ORT_LIB_NAME),
                root.join("models").join(ORT_LIB_NAME),
            ]
        })
        .collect()
}

/// Build a CPU session for `model_path`.
pub fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let mut builder = Session::builder().context("failed to create ORT session builder")?;
    builder = builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("failed to set ORT optimization level")?;
    builder = builder
        .with_intra_threads(intra_threads.max(1))
        .context("failed to set ORT intra threads")?;
    builder = builder
        .with_execution_providers([ep::CPUExecutionProvider::default().build()])
        .context("failed to register execution providers")?;
    builder
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ONNX model: {}", model_path.display()))
}

/// Extract the first output tensor as `(shape, data)`.
pub fn first_output(outputs: &SessionOutputs<'_>) -> Result<(Vec<i64>, Vec<f32>)> {
    let first_value = outputs
        .iter()
        .next()
        .context("model produced no outputs")?
        .1;

    let (shape, data) = first_value
        .try_extract_tensor::<f32>()
        .context("failed to extract output tensor")?;

    Ok((shape.to_vec(), data.to_vec()))
}

/// Number of threads to give each ORT session.
pub fn default_intra_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}
