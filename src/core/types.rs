//! Core data types for shared-anchor alignment

use crate::core::constants::{MIN_QUATERNION_NORM, POSE_EPSILON, QUATERNION_NORM_TOLERANCE};
use crate::validation::error::ValidationError;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session participant identifier (the transport's actor number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rigid pose: position plus unit rotation.
///
/// A `Pose` can only be built from validated input, so the rotation held here
/// is always a unit quaternion. Deserialisation goes through the same checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoseData", into = "PoseData")]
pub struct Pose {
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
}

/// Plain serialised form of a pose, rotation in x/y/z/w order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseData {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl TryFrom<PoseData> for Pose {
    type Error = ValidationError;

    fn try_from(data: PoseData) -> Result<Self, Self::Error> {
        Pose::new(data.position, data.rotation)
    }
}

impl From<Pose> for PoseData {
    fn from(pose: Pose) -> Self {
        PoseData {
            position: pose.position_array(),
            rotation: pose.rotation_xyzw(),
        }
    }
}

impl Pose {
    /// Build a pose from raw components, rotation given as `[x, y, z, w]`.
    ///
    /// Rotations within [`QUATERNION_NORM_TOLERANCE`] of unit length are
    /// renormalised; anything further off, near zero, or non-finite is rejected.
    pub fn new(position: [f32; 3], rotation: [f32; 4]) -> Result<Self, ValidationError> {
        for (axis, value) in ["x", "y", "z"].iter().zip(position.iter()) {
            if !value.is_finite() {
                return Err(ValidationError::NonFinitePosition {
                    axis: (*axis).to_string(),
                    value: *value,
                });
            }
        }

        Ok(Self {
            position: Vector3::new(position[0], position[1], position[2]),
            rotation: validate_rotation(rotation)?,
        })
    }

    /// Pose from already-normalised nalgebra parts
    pub fn from_parts(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: Vector3::new(x, y, z),
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.rotation
    }

    pub fn position_array(&self) -> [f32; 3] {
        [self.position.x, self.position.y, self.position.z]
    }

    /// Rotation components in x/y/z/w order
    pub fn rotation_xyzw(&self) -> [f32; 4] {
        let q = self.rotation.quaternion();
        [q.i, q.j, q.k, q.w]
    }

    pub fn to_isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.position), self.rotation)
    }

    pub fn from_isometry(isometry: &Isometry3<f32>) -> Self {
        Self {
            position: isometry.translation.vector,
            rotation: isometry.rotation,
        }
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            position: -(rotation * self.position),
            rotation,
        }
    }

    /// `self ∘ other`: express `other` (given in this pose's frame) in the parent frame
    pub fn compose(&self, other: &Pose) -> Self {
        Self {
            position: self.position + self.rotation * other.position,
            rotation: self.rotation * other.rotation,
        }
    }

    pub fn transform_point(&self, point: Vector3<f32>) -> Vector3<f32> {
        self.position + self.rotation * point
    }

    pub fn is_identity(&self, tolerance: f32) -> bool {
        self.approx_eq(&Pose::identity(), tolerance)
    }

    /// Compare positions by distance and rotations by angle (radians)
    pub fn approx_eq(&self, other: &Pose, tolerance: f32) -> bool {
        (self.position - other.position).norm() <= tolerance
            && self.angle_to(other) <= tolerance
    }

    /// Angle between the two rotations (radians).
    ///
    /// Uses atan2 on the relative quaternion; `acos(w)` loses all precision
    /// near zero in f32.
    pub fn angle_to(&self, other: &Pose) -> f32 {
        let relative = self.rotation.rotation_to(&other.rotation);
        let q = relative.quaternion();
        2.0 * q.imag().norm().atan2(q.w.abs())
    }

    /// Same physical measurement, within [`POSE_EPSILON`]
    pub fn same_measurement(&self, other: &Pose) -> bool {
        self.approx_eq(other, POSE_EPSILON)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.rotation.euler_angles();
        write!(
            f,
            "pos=({:.3}, {:.3}, {:.3}) rot=({:.1}°, {:.1}°, {:.1}°)",
            self.position.x,
            self.position.y,
            self.position.z,
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        )
    }
}

/// Validate an `[x, y, z, w]` quaternion and return it as a unit rotation
pub fn validate_rotation(rotation: [f32; 4]) -> Result<UnitQuaternion<f32>, ValidationError> {
    if rotation.iter().any(|c| !c.is_finite()) {
        return Err(ValidationError::NonFiniteRotation { components: rotation });
    }

    let quaternion = Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]);
    let norm = quaternion.norm();

    if norm < MIN_QUATERNION_NORM {
        return Err(ValidationError::DegenerateRotation { norm });
    }
    if (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
        return Err(ValidationError::UnnormalizedRotation { norm });
    }

    Ok(UnitQuaternion::new_normalize(quaternion))
}

/// This device's own measurement of the physical reference. Never transmitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalReference {
    pub pose: Pose,
    pub registered_at_ms: u64,
}

/// The authoritative shared anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub pose: Pose,
    pub published_by: ParticipantId,
    pub version: u32,
}

impl AnchorRecord {
    pub fn new(pose: Pose, published_by: ParticipantId, version: u32) -> Self {
        Self {
            pose,
            published_by,
            version,
        }
    }

    /// Last-writer-wins by version: only a strictly greater version replaces the cache
    pub fn supersedes(&self, cached: Option<&AnchorRecord>) -> bool {
        match cached {
            Some(current) => self.version > current.version,
            None => true,
        }
    }
}

/// Where the current alignment frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameSource {
    /// Nothing derived yet
    Unaligned,
    /// This device published the anchor; its frame is the identity
    Authority { anchor_version: u32 },
    /// Derived from a shared anchor and a local measurement
    Reconciled { anchor_version: u32 },
}

/// Transform applied to all shared content on this device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentFrame {
    pub pose: Pose,
    pub source: FrameSource,
    /// Incremented every time the frame is re-derived
    pub revision: u64,
}

impl AlignmentFrame {
    pub fn unaligned() -> Self {
        Self {
            pose: Pose::identity(),
            source: FrameSource::Unaligned,
            revision: 0,
        }
    }

    pub fn is_aligned(&self) -> bool {
        !matches!(self.source, FrameSource::Unaligned)
    }

    pub fn anchor_version(&self) -> Option<u32> {
        match self.source {
            FrameSource::Unaligned => None,
            FrameSource::Authority { anchor_version }
            | FrameSource::Reconciled { anchor_version } => Some(anchor_version),
        }
    }

    /// Map a pose measured in local device space into the shared frame
    pub fn apply(&self, local: &Pose) -> Pose {
        self.pose.compose(local)
    }
}

impl Default for AlignmentFrame {
    fn default() -> Self {
        Self::unaligned()
    }
}
