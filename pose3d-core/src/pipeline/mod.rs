//! pipeline — per-frame orchestration and video accumulation
//!
//! One frame runs detect → filter → extract → root → pose. A frame without
//! qualifying people is skipped before any root or pose call. Video runs go
//! through a `VideoSession`, which keeps frame order, accumulates results and
//! per-stage timings, and is finalized once the source is exhausted.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::config::PipelineConfig;
use crate::detection::{filter_person_boxes, Detector, OrtDetector};
use crate::geometry::BoundingBox;
use crate::patch::{extract_candidates, Patch};
use crate::pose::{estimate_poses, OrtPoseNet, PoseEstimate, PoseEstimator};
use crate::root::{estimate_roots, OrtRootNet, RootEstimator};
use crate::video::RgbFrame;

/// Log aggregate timings every this many frames.
const TIMING_LOG_INTERVAL: u64 = 100;

/// Where a frame currently is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PendingFrame,
    Detecting,
    Skipped,
    Extracting,
    RootEstimating,
    PoseEstimating,
    Accumulating,
    Finalizing,
    Done,
}

/// Poses of every retained person in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Zero-based index of the frame in decode order.
    pub frame_index: u64,
    pub poses: Vec<PoseEstimate>,
}

/// Progress report emitted after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProgress {
    pub frame_index: u64,
    pub total: Option<u64>,
    pub persons: usize,
}

/// Counters and wall-clock timings of a run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub frames: u64,
    pub skipped: u64,
    pub persons: u64,
    pub detect: Duration,
    pub extract: Duration,
    pub root: Duration,
    pub pose: Duration,
    pub elapsed: Duration,
}

impl RunStats {
    fn ms_per_frame(&self, d: Duration) -> String {
        format!("{:.2}", d.as_secs_f64() * 1000.0 / self.frames.max(1) as f64)
    }
}

/// Accumulated output of a video run.
#[derive(Debug, Clone)]
pub struct VideoRun {
    /// One entry per non-skipped frame, in frame order.
    pub frames: Vec<FrameResult>,
    pub stats: RunStats,
}

pub struct Pipeline<D, R, P> {
    detector: D,
    root_model: R,
    pose_model: P,
    config: PipelineConfig,
}

impl Pipeline<OrtDetector, OrtRootNet, OrtPoseNet> {
    /// Load the three ONNX models.
    pub fn load<A: AsRef<Path>, B: AsRef<Path>, C: AsRef<Path>>(
        detector_path: A,
        root_path: B,
        pose_path: C,
        config: PipelineConfig,
    ) -> Result<Self> {
        let detector = OrtDetector::load(detector_path, &config.detection)?;
        let root_model = OrtRootNet::load(root_path)?;
        let pose_model = OrtPoseNet::load(pose_path, &config.pose)?;
        Ok(Self::new(detector, root_model, pose_model, config))
    }
}

impl<D: Detector, R: RootEstimator, P: PoseEstimator> Pipeline<D, R, P> {
    pub fn new(detector: D, root_model: R, pose_model: P, config: PipelineConfig) -> Self {
        Self {
            detector,
            root_model,
            pose_model,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn into_parts(self) -> (D, R, P) {
        (self.detector, self.root_model, self.pose_model)
    }

    /// Single-image mode. No qualifying people yields an empty result.
    pub fn process_image(&mut self, frame: &RgbFrame) -> Result<FrameResult> {
        let mut stats = RunStats::default();
        let mut stage = Stage::PendingFrame;
        let result = self
            .run_stages(frame, 0, &mut stats, &mut stage)?
            .unwrap_or(FrameResult {
                frame_index: 0,
                poses: Vec::new(),
            });
        info!(persons = result.poses.len(), "image processed");
        Ok(result)
    }

    /// Begin a video run. `total` is the expected frame count, if known.
    pub fn start_video(&mut self, total: Option<u64>) -> VideoSession<'_, D, R, P> {
        VideoSession {
            pipeline: self,
            frames: Vec::new(),
            stats: RunStats::default(),
            stage: Stage::PendingFrame,
            next_index: 0,
            total,
            started: Instant::now(),
        }
    }

    /// Run a whole frame sequence. The first error aborts the run.
    pub fn run_video<I, F>(&mut self, frames: I, total: Option<u64>, mut progress: F) -> Result<VideoRun>
    where
        I: IntoIterator<Item = Result<RgbFrame>>,
        F: FnMut(FrameProgress),
    {
        let mut session = self.start_video(total);
        for frame in frames {
            let report = session.push(&frame?)?;
            progress(report);
        }
        Ok(session.finish())
    }

    fn run_stages(
        &mut self,
        frame: &RgbFrame,
        frame_index: u64,
        stats: &mut RunStats,
        stage: &mut Stage,
    ) -> Result<Option<FrameResult>> {
        enter(stage, Stage::Detecting, frame_index);
        let t = Instant::now();
        let detections = self.detector.detect(frame)?;
        let boxes = filter_person_boxes(
            &detections,
            frame.width,
            frame.height,
            &self.config.detection,
        );
        stats.detect += t.elapsed();

        if boxes.is_empty() {
            enter(stage, Stage::Skipped, frame_index);
            debug!(frame_index, candidates = detections.len(), "no qualifying people; frame skipped");
            return Ok(None);
        }

        enter(stage, Stage::Extracting, frame_index);
        let t = Instant::now();
        let candidates = extract_candidates(frame, &boxes, &self.config.patch)?;
        stats.extract += t.elapsed();

        enter(stage, Stage::RootEstimating, frame_index);
        let t = Instant::now();
        let roots = estimate_roots(&mut self.root_model, &candidates, &self.config.root)?;
        stats.root += t.elapsed();

        enter(stage, Stage::PoseEstimating, frame_index);
        let t = Instant::now();
        let windows: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
        let patches: Vec<Patch> = candidates.into_iter().map(|c| c.patch).collect();
        let mut poses = estimate_poses(
            &mut self.pose_model,
            &windows,
            &patches,
            &roots,
            &self.config.pose,
        )?;
        stats.pose += t.elapsed();

        if let Some(intrinsics) = self.config.intrinsics_for(frame.width, frame.height) {
            poses = poses
                .into_iter()
                .map(|p| p.with_camera(&intrinsics))
                .collect();
        }

        stats.persons += poses.len() as u64;
        Ok(Some(FrameResult { frame_index, poses }))
    }
}

fn enter(stage: &mut Stage, next: Stage, frame_index: u64) {
    trace!(frame_index, from = ?*stage, to = ?next, "stage");
    *stage = next;
}

/// An in-progress video run. Frames must be pushed in decode order.
pub struct VideoSession<'a, D, R, P> {
    pipeline: &'a mut Pipeline<D, R, P>,
    frames: Vec<FrameResult>,
    stats: RunStats,
    stage: Stage,
    next_index: u64,
    total: Option<u64>,
    started: Instant,
}

impl<D: Detector, R: RootEstimator, P: PoseEstimator> VideoSession<'_, D, R, P> {
    /// Process the next frame and append its result unless it was skipped.
    pub fn push(&mut self, frame: &RgbFrame) -> Result<FrameProgress> {
        let frame_index = self.next_index;
        self.next_index += 1;

        let result = self
            .pipeline
            .run_stages(frame, frame_index, &mut self.stats, &mut self.stage)?;
        let persons = result.as_ref().map_or(0, |r| r.poses.len());

        match result {
            Some(r) => {
                enter(&mut self.stage, Stage::Accumulating, frame_index);
                self.frames.push(r);
            }
            None => self.stats.skipped += 1,
        }
        self.stats.frames += 1;
        enter(&mut self.stage, Stage::PendingFrame, frame_index);

        debug!(frame = frame_index + 1, total = ?self.total, persons, "frame processed");
        if self.stats.frames % TIMING_LOG_INTERVAL == 0 {
            self.log_timings("pipeline timings");
        }

        Ok(FrameProgress {
            frame_index,
            total: self.total,
            persons,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Results accumulated so far.
    pub fn frames(&self) -> &[FrameResult] {
        &self.frames
    }

    /// End of stream: stop the clock and hand over the accumulated results.
    pub fn finish(mut self) -> VideoRun {
        enter(&mut self.stage, Stage::Finalizing, self.next_index);
        self.stats.elapsed = self.started.elapsed();
        self.log_timings("video run complete");
        enter(&mut self.stage, Stage::Done, self.next_index);
        VideoRun {
            frames: self.frames,
            stats: self.stats,
        }
    }

    fn log_timings(&self, message: &str) {
        let s = &self.stats;
        info!(
            frames = s.frames,
            skipped = s.skipped,
            persons = s.persons,
            detect_ms_per_frame = s.ms_per_frame(s.detect),
            extract_ms_per_frame = s.ms_per_frame(s.extract),
            root_ms_per_frame = s.ms_per_frame(s.root),
            pose_ms_per_frame = s.ms_per_frame(s.pose),
            elapsed_s = format!("{:.2}", self.started.elapsed().as_secs_f64()),
            "{message}"
        );
    }
}
