use std::collections::VecDeque;

use anyhow::{bail, Result};
use pose3d_core::config::{CameraConfig, PipelineConfig};
use pose3d_core::detection::{Detection, Detector};
use pose3d_core::geometry::CornerBox;
use pose3d_core::patch::Patch;
use pose3d_core::pipeline::{Pipeline, Stage};
use pose3d_core::pose::PoseEstimator;
use pose3d_core::root::{RawRoot, RootEstimator};
use pose3d_core::video::RgbFrame;

const W: u32 = 200;
const H: u32 = 100;

/// Replays one scripted detection list per call.
struct ScriptedDetector {
    frames: VecDeque<Vec<Detection>>,
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbFrame) -> Result<Vec<Detection>> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
struct CountingRoot {
    calls: usize,
    fail: bool,
}

impl RootEstimator for CountingRoot {
    fn infer(&mut self, patches: &[Patch], depth_priors: &[f32]) -> Result<Vec<RawRoot>> {
        self.calls += 1;
        if self.fail {
            bail!("root model exploded");
        }
        assert_eq!(patches.len(), depth_priors.len());
        Ok(patches
            .iter()
            .map(|_| RawRoot {
                x: 32.0,
                y: 32.0,
                depth: 3000.0,
            })
            .collect())
    }
}

#[derive(Default)]
struct CountingPose {
    calls: usize,
}

impl PoseEstimator for CountingPose {
    fn infer(&mut self, patches: &[Patch], _root_depths: &[f32]) -> Result<Vec<Vec<[f32; 3]>>> {
        self.calls += 1;
        Ok(patches.iter().map(|_| vec![[32.0, 32.0, 32.0]; 21]).collect())
    }
}

/// A confident person covering 5% of a 200×100 frame.
fn person() -> Detection {
    Detection {
        bbox: CornerBox::new(50.0, 25.0, 70.0, 75.0),
        class_id: 0,
        score: 0.95,
    }
}

fn pipeline(
    frames: Vec<Vec<Detection>>,
    config: PipelineConfig,
) -> Pipeline<ScriptedDetector, CountingRoot, CountingPose> {
    let detector = ScriptedDetector {
        frames: frames.into(),
    };
    Pipeline::new(detector, CountingRoot::default(), CountingPose::default(), config)
}

fn frame() -> RgbFrame {
    RgbFrame::filled(W, H, [120, 90, 60])
}

#[test]
fn test_one_person_one_pose() {
    let mut p = pipeline(vec![vec![person()]], PipelineConfig::default());
    let result = p.process_image(&frame()).unwrap();

    assert_eq!(result.poses.len(), 1);
    let pose = &result.poses[0];
    // crop window is the 50×50 square around the box centre (60, 50)
    assert!((pose.root.image_x - 60.0).abs() < 1e-3);
    assert!((pose.root.image_y - 50.0).abs() < 1e-3);
    assert_eq!(pose.root.depth, 3000.0);
    assert_eq!(pose.joints.len(), 21);
    assert!(pose.joints.iter().all(|j| (j.z - 3000.0).abs() < 1e-3));
    assert!(pose.camera_joints.is_none());

    let (_, root, pose_model) = p.into_parts();
    assert_eq!((root.calls, pose_model.calls), (1, 1));
}

#[test]
fn test_no_detections_skips_models() {
    let mut p = pipeline(vec![Vec::new()], PipelineConfig::default());
    let result = p.process_image(&frame()).unwrap();
    assert!(result.poses.is_empty());

    let (_, root, pose_model) = p.into_parts();
    assert_eq!((root.calls, pose_model.calls), (0, 0));
}

#[test]
fn test_unqualified_detections_skip_models() {
    let low_score = Detection {
        score: 0.5,
        ..person()
    };
    let not_person = Detection {
        class_id: 2,
        ..person()
    };
    let tiny = Detection {
        bbox: CornerBox::new(0.0, 0.0, 10.0, 10.0),
        ..person()
    };
    let mut p = pipeline(vec![vec![low_score, not_person, tiny]], PipelineConfig::default());
    assert!(p.process_image(&frame()).unwrap().poses.is_empty());
    assert_eq!(p.into_parts().1.calls, 0);
}

#[test]
fn test_video_skips_empty_frame() {
    let script = vec![vec![person()], Vec::new(), vec![person(), person()]];
    let mut p = pipeline(script, PipelineConfig::default());

    let mut reports = Vec::new();
    let frames = (0..3).map(|_| Ok(frame()));
    let run = p.run_video(frames, Some(3), |r| reports.push(r)).unwrap();

    let indices: Vec<u64> = run.frames.iter().map(|f| f.frame_index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(run.frames[1].poses.len(), 2);
    assert_eq!(run.stats.frames, 3);
    assert_eq!(run.stats.skipped, 1);
    assert_eq!(run.stats.persons, 3);

    let persons: Vec<usize> = reports.iter().map(|r| r.persons).collect();
    assert_eq!(persons, vec![1, 0, 2]);
    assert!(reports.iter().all(|r| r.total == Some(3)));

    let (_, root, _) = p.into_parts();
    assert_eq!(root.calls, 2);
}

#[test]
fn test_session_stages() {
    let mut p = pipeline(vec![vec![person()]], PipelineConfig::default());
    let mut session = p.start_video(None);
    assert_eq!(session.stage(), Stage::PendingFrame);
    session.push(&frame()).unwrap();
    assert_eq!(session.stage(), Stage::PendingFrame);
    assert_eq!(session.frames().len(), 1);
    let run = session.finish();
    assert_eq!(run.frames.len(), 1);
}

#[test]
fn test_model_failure_aborts_run() {
    let mut p = pipeline(vec![vec![person()], vec![person()]], PipelineConfig::default());
    let (d, _, pose_model) = p.into_parts();
    let root = CountingRoot {
        fail: true,
        ..Default::default()
    };
    p = Pipeline::new(d, root, pose_model, PipelineConfig::default());

    let frames = (0..2).map(|_| Ok(frame()));
    let err = p.run_video(frames, None, |_| {}).unwrap_err();
    assert!(err.to_string().contains("root model exploded"));

    let (_, root, pose_model) = p.into_parts();
    assert_eq!(root.calls, 1);
    assert_eq!(pose_model.calls, 0);
}

#[test]
fn test_decode_error_aborts_run() {
    let mut p = pipeline(vec![vec![person()]], PipelineConfig::default());
    let frames = vec![Ok(frame()), Err(anyhow::anyhow!("corrupt packet"))];
    assert!(p.run_video(frames, None, |_| {}).is_err());
}

#[test]
fn test_camera_intrinsics_attach_camera_space() {
    let config = PipelineConfig {
        camera: Some(CameraConfig {
            focal: [1000.0, 1000.0],
            principal: None,
        }),
        ..Default::default()
    };
    let mut p = pipeline(vec![vec![person()]], config);
    let result = p.process_image(&frame()).unwrap();
    let pose = &result.poses[0];

    // root at (60, 50) with principal point (100, 50)
    let cam = pose.root.camera.unwrap();
    assert!((cam[0] - (60.0 - 100.0) / 1000.0 * 3000.0).abs() < 1e-2);
    assert!(cam[1].abs() < 1e-2);
    assert_eq!(cam[2], 3000.0);

    let joints = pose.camera_joints.as_ref().unwrap();
    assert_eq!(joints.len(), 21);
    assert!(joints.iter().all(|j| (j.z - 3000.0).abs() < 1e-3));
}
