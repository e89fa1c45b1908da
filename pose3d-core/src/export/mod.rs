//! export — persisted run output
//!
//! A video run is saved as a `bincode` blob of its ordered `FrameResult`
//! list, and flattened into CSV with one row per person per frame. Both
//! writers go through a temporary sibling file that is renamed into place,
//! so a failed write never leaves a truncated artifact behind.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::pipeline::FrameResult;

/// Serialize `frames` to `path` with bincode.
pub fn save_binary<P: AsRef<Path>>(frames: &[FrameResult], path: P) -> Result<()> {
    let path = path.as_ref();
    write_atomically(path, |writer| {
        bincode::serialize_into(writer, frames).context("failed to serialize frame results")
    })?;
    info!(path = %path.display(), frames = frames.len(), "saved binary results");
    Ok(())
}

/// Load a result list written by [`save_binary`].
pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Vec<FrameResult>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open results: {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("failed to decode results: {}", path.display()))
}

/// Write one CSV row per person per frame:
/// `frame,person,root_x,root_y,root_depth,j0_x,j0_y,j0_z,...`.
///
/// Joint columns cover the widest pose in `frames`; shorter rows leave the
/// remaining cells empty.
pub fn write_csv<P: AsRef<Path>>(frames: &[FrameResult], path: P) -> Result<()> {
    let path = path.as_ref();
    let joint_cols = frames
        .iter()
        .flat_map(|f| f.poses.iter().map(|p| p.joints.len()))
        .max()
        .unwrap_or(0);

    let mut rows = 0usize;
    write_atomically(path, |writer| {
        write!(writer, "frame,person,root_x,root_y,root_depth")?;
        for j in 0..joint_cols {
            write!(writer, ",j{j}_x,j{j}_y,j{j}_z")?;
        }
        writeln!(writer)?;

        for frame in frames {
            for (person, pose) in frame.poses.iter().enumerate() {
                write!(
                    writer,
                    "{},{},{},{},{}",
                    frame.frame_index, person, pose.root.image_x, pose.root.image_y, pose.root.depth
                )?;
                for j in 0..joint_cols {
                    match pose.joints.get(j) {
                        Some(joint) => write!(writer, ",{},{},{}", joint.x, joint.y, joint.z)?,
                        None => write!(writer, ",,,")?,
                    }
                }
                writeln!(writer)?;
                rows += 1;
            }
        }
        Ok(())
    })?;
    info!(path = %path.display(), rows, "wrote CSV export");
    Ok(())
}

/// Flatten a saved binary result file into CSV.
pub fn binary_to_csv<P: AsRef<Path>, Q: AsRef<Path>>(binary_path: P, csv_path: Q) -> Result<()> {
    let frames = load_binary(binary_path)?;
    write_csv(&frames, csv_path)
}

fn write_atomically<F>(path: &Path, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = temp_path(path);
    let result = (|| {
        let file = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        write_fn(&mut writer)?;
        writer.flush().context("failed to flush output")?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move output into {}", path.display()))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
