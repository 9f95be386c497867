use crate::core::types::{AnchorRecord, LocalReference, Pose};

/// Outcome of reconciling a local measurement against the shared anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    /// Transform that maps the local reference onto the anchor
    pub delta: Pose,
    /// Anchor version the delta was derived from
    pub anchor_version: u32,
    /// Distance between `delta ∘ local` and the anchor position (meters)
    pub position_residual: f32,
    /// Angle between `delta ∘ local` and the anchor rotation (radians)
    pub rotation_residual: f32,
}

/// Rigid transform `delta` with `delta ∘ local == anchor`.
///
/// deltaRotation = anchor.rotation * local.rotation⁻¹
/// deltaPosition = anchor.position - deltaRotation * local.position
pub fn alignment_delta(anchor: &Pose, local: &Pose) -> Pose {
    let mut delta_rotation = anchor.rotation() * local.rotation().inverse();
    delta_rotation.renormalize_fast();
    let delta_position = anchor.position() - delta_rotation * local.position();
    Pose::from_parts(delta_position, delta_rotation)
}

/// Reconcile a local reference against an anchor record.
pub fn reconcile(record: &AnchorRecord, local: &LocalReference) -> Reconciliation {
    let delta = alignment_delta(&record.pose, &local.pose);
    let (position_residual, rotation_residual) = residual(&delta, &local.pose, &record.pose);

    Reconciliation {
        delta,
        anchor_version: record.version,
        position_residual,
        rotation_residual,
    }
}

/// How far `delta ∘ local` lands from `anchor`
pub fn residual(delta: &Pose, local: &Pose, anchor: &Pose) -> (f32, f32) {
    let landed = delta.compose(local);
    (
        (landed.position() - anchor.position()).norm(),
        landed.angle_to(anchor),
    )
}
