use glam::{Quat, Vec3};
use variantly::Variantly;

/// A rigid transform: orientation plus world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
	pub position: Vec3,
	pub orientation: Quat,
}
impl Pose {
	pub fn new(position: Vec3, orientation: Quat) -> Self {
		Self {
			position,
			orientation,
		}
	}
	pub fn identity() -> Self {
		Self::new(Vec3::ZERO, Quat::IDENTITY)
	}
}

/// Half-extents of an axis-aligned-in-local-space bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
	pub half_extents: Vec3,
}
impl Bounds {
	pub fn new(half_extents: Vec3) -> Self {
		Self { half_extents }
	}
	/// `max(halfBounds.x, halfBounds.y, halfBounds.z)`.
	pub fn radius(&self) -> f32 {
		self.half_extents.max_element()
	}
}

/// The eight corners of the local-space bounding box implied by
/// `half_extents`, in an arbitrary but fixed order.
pub fn local_box_corners(half_extents: Vec3) -> [Vec3; 8] {
	let Vec3 { x, y, z } = half_extents;
	[
		Vec3::new(x, y, z),
		Vec3::new(x, y, -z),
		Vec3::new(x, -y, z),
		Vec3::new(x, -y, -z),
		Vec3::new(-x, y, z),
		Vec3::new(-x, y, -z),
		Vec3::new(-x, -y, z),
		Vec3::new(-x, -y, -z),
	]
}

/// Which external category an object belongs to, and whatever extra
/// routing data that category's reader/observer pair needs. Dispatch
/// from a concrete scene-graph type down to this closed set happens
/// entirely inside the caller's [`SceneCollaborator`] implementation -
/// this crate never inspects a concrete scene-graph type itself.
#[derive(Debug, Clone, Copy, PartialEq, Variantly)]
pub enum DimensionKind {
	/// A single rigid body with its own transform.
	RigidBody,
	/// A multi-part model; pose is that of the model's root.
	Composite,
	/// A bone within an animated skeleton.
	Bone { skeleton_id: u64, bone_index: u32 },
	/// A fixed offset from some other transform (e.g. a weapon socket).
	Attachment { parent_id: u64 },
	/// A beam/ray-shaped effect source with an explicit length.
	Beam { length: f32 },
	/// A particle emitter with an effective radius independent of any
	/// visual mesh bounds.
	RangedEmitter { radius_override: f32 },
	/// A positional sound source, likewise with an explicit radius.
	RangedSound { radius_override: f32 },
}

/// Opaque token for a change-observer subscription. Disposed by handing
/// it back to [`SceneCollaborator::unobserve`]; this crate never
/// interprets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

/// Notification delivered when an observed object's pose or bounds
/// change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionUpdate {
	pub pose: Pose,
	pub bounds: Bounds,
}

/// External collaborator that resolves pose and bounds for scene
/// objects of type `Obj`, and lets the registry subscribe to changes.
///
/// This is the only way the scheduler learns about an object's shape
/// in the world; scene-graph traversal, asset loading, and tag-based
/// auto-registration all live on the caller's side of this trait.
pub trait SceneCollaborator<Obj> {
	/// Classifies `object` and resolves its current pose and bounds.
	/// Returns `None` if this object's pose or bounds cannot be
	/// resolved yet (the object becomes `NotAddable`).
	fn resolve(&self, object: &Obj) -> Option<(DimensionKind, DimensionUpdate)>;

	/// Subscribes to future pose/bounds changes for `object`. The
	/// callback is fire-and-forget: it must not panic, and any error it
	/// encounters must be handled internally rather than propagated.
	fn observe(
		&mut self,
		object: &Obj,
		on_change: Box<dyn FnMut(DimensionUpdate)>,
	) -> ObserverHandle;

	/// Cancels a subscription previously returned by [`Self::observe`].
	fn unobserve(&mut self, handle: ObserverHandle);

	/// Polls the current pose/bounds directly, bypassing observers.
	/// Used for physics-flagged objects whose motion isn't always
	/// reflected through change callbacks.
	fn poll(&self, object: &Obj) -> Option<DimensionUpdate>;
}

/// External camera collaborator: pose, field of view, and viewport
/// aspect ratio.
pub trait CameraSource {
	fn pose(&self) -> Pose;
	/// Field of view, in degrees, along the vertical axis.
	fn fov_degrees(&self) -> f32;
	fn aspect_ratio(&self) -> f32;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn radius_is_largest_half_extent() {
		let b = Bounds::new(Vec3::new(1.0, 3.0, 2.0));
		assert_eq!(b.radius(), 3.0);
	}

	#[test]
	fn local_box_corners_are_symmetric_about_origin() {
		let corners = local_box_corners(Vec3::new(1.0, 2.0, 3.0));
		let sum: Vec3 = corners.iter().copied().sum();
		assert!(sum.length() < 1e-5);
	}
}
