//! skeleton — joint orders of the supported datasets

/// A named joint order plus the bones used for drawing.
#[derive(Debug, Clone, Copy)]
pub struct Skeleton {
    pub name: &'static str,
    pub joints: &'static [&'static str],
    pub bones: &'static [(usize, usize)],
}

impl Skeleton {
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn index_of(&self, joint: &str) -> Option<usize> {
        self.joints.iter().position(|j| *j == joint)
    }

    /// Index of the pelvis joint.
    pub fn root_index(&self) -> usize {
        // Both supported skeletons define a pelvis.
        self.index_of("Pelvis").unwrap_or(0)
    }
}

/// MuCo-3DHP / MuPoTS 21-joint order.
pub const MUCO: Skeleton = Skeleton {
    name: "muco",
    joints: &[
        "Head_top", "Thorax", "R_Shoulder", "R_Elbow", "R_Wrist", "L_Shoulder", "L_Elbow",
        "L_Wrist", "R_Hip", "R_Knee", "R_Ankle", "L_Hip", "L_Knee", "L_Ankle", "Pelvis", "Spine",
        "Head", "R_Hand", "L_Hand", "R_Toe", "L_Toe",
    ],
    bones: &[
        (0, 16), (16, 1), (1, 15), (15, 14), (14, 8), (14, 11), (8, 9), (9, 10), (10, 19),
        (11, 12), (12, 13), (13, 20), (1, 2), (2, 3), (3, 4), (4, 17), (1, 5), (5, 6), (6, 7),
        (7, 18),
    ],
};

/// MPII 16-joint order.
pub const MPII: Skeleton = Skeleton {
    name: "mpii",
    joints: &[
        "R_Ankle", "R_Knee", "R_Hip", "L_Hip", "L_Knee", "L_Ankle", "Pelvis", "Thorax", "Neck",
        "Head", "R_Wrist", "R_Elbow", "R_Shoulder", "L_Shoulder", "L_Elbow", "L_Wrist",
    ],
    bones: &[
        (0, 1), (1, 2), (2, 6), (6, 3), (3, 4), (4, 5), (6, 7), (7, 8), (8, 9), (7, 12),
        (12, 11), (11, 10), (7, 13), (13, 14), (14, 15),
    ],
};

/// Skeleton whose joint count matches `joint_num`, if any.
pub fn for_joint_count(joint_num: usize) -> Option<&'static Skeleton> {
    [&MUCO, &MPII]
        .into_iter()
        .find(|s| s.joint_count() == joint_num)
}
