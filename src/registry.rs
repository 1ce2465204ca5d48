use glam::Vec3;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::clock::Clock;
use crate::dimension::{Bounds, DimensionKind, ObserverHandle, Pose, SceneCollaborator};
use crate::handle::ObjectHandle;
use crate::priority_queue::PriorityQueue;
use crate::voxel::{VoxelGrid, VoxelKey};

/// A voxel footprint rarely spans more than a handful of cells; inline
/// storage for up to 9 (one center plus eight corners) avoids a heap
/// allocation for the overwhelmingly common case.
pub type VoxelKeySet = SmallVec<[VoxelKey; 9]>;

/// Everything the scheduler tracks about one registered object.
#[derive(Debug)]
pub struct ObjectRecord<Obj> {
	pub object: Obj,
	pub pose: Pose,
	pub half_bounds: Bounds,
	pub radius: f32,
	pub dimension_kind: DimensionKind,
	pub observer_handle: Option<ObserverHandle>,
	pub is_physics: bool,

	/// Distance from the camera as of the last frustum search that
	/// touched this object's voxel.
	pub distance: f32,

	/// Voxels this object currently occupies in the grid.
	pub voxel_keys: VoxelKeySet,
	/// Scratch map reused by `recompute_desired_voxels` to avoid
	/// reallocating a set on every recompute: `true` means the key is
	/// wanted this pass, entries are cleared (not dropped) between
	/// calls.
	desired_voxel_keys: FxHashMap<VoxelKey, bool>,
	/// Diff already computed by [`ObjectRegistry::recompute_desired_voxels`]
	/// but not yet applied to the grid - `drain_voxel_updates` applies it
	/// under budget without recomputing anything.
	pending_diff: Option<VoxelDiff>,

	pub last_check_clock: f64,
	pub last_update_clock: f64,
	/// Per-object offset folded into the visibility grace window so
	/// that a batch of objects added on the same frame don't all come
	/// up for re-check on the same later frame.
	pub jitter_offset: f64,
}

/// Diff produced by [`ObjectRegistry::recompute_desired_voxels`]: voxels
/// to add the object to and voxels to remove it from.
#[derive(Debug, Default, Clone)]
pub struct VoxelDiff {
	pub to_insert: VoxelKeySet,
	pub to_remove: VoxelKeySet,
}

/// Owns every registered object's bookkeeping record, the spatial
/// [`VoxelGrid`] it's indexed by, and the two cooperative queues that
/// keep both in sync under a time budget: the voxel-membership update
/// queue and the physics round-robin poll cursor.
#[derive(Debug)]
pub struct ObjectRegistry<Obj> {
	records: SlotMap<ObjectHandle, ObjectRecord<Obj>>,
	grid: VoxelGrid,
	voxel_size: f32,

	/// Handles with an already-computed [`VoxelDiff`] waiting to be
	/// applied to the grid, ordered by Manhattan distance from the
	/// object to the camera so `drain_voxel_updates`'s budget is spent
	/// on the nearest objects first rather than whichever moved last.
	dirty: PriorityQueue<ObjectHandle>,

	physics_objects: Vec<ObjectHandle>,
	physics_cursor: usize,
}

impl<Obj> ObjectRegistry<Obj> {
	pub fn new(voxel_size: f32) -> Self {
		Self {
			records: SlotMap::with_key(),
			grid: VoxelGrid::new(),
			voxel_size,
			dirty: PriorityQueue::new(),
			physics_objects: Vec::new(),
			physics_cursor: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
	pub fn grid(&self) -> &VoxelGrid {
		&self.grid
	}
	pub fn voxel_size(&self) -> f32 {
		self.voxel_size
	}

	/// Rebuilds the grid in place at a new voxel size, re-deriving every
	/// object's footprint. Used by `SetVoxelSize`.
	pub fn rebuild_with_voxel_size(&mut self, voxel_size: f32) {
		self.voxel_size = voxel_size;
		self.grid = VoxelGrid::new();
		self.dirty.clear();
		let handles: Vec<ObjectHandle> = self.records.keys().collect();
		for handle in handles {
			let record = &self.records[handle];
			let keys = voxel_footprint(record.pose.position, record.radius, voxel_size);
			for key in &keys {
				self.grid.insert(*key, handle);
			}
			self.records[handle].voxel_keys = keys;
			self.records[handle].pending_diff = None;
		}
	}

	/// Reclaims capacity in the grid's backing map. Cheap to call
	/// periodically; does not touch correctness.
	pub fn shrink_to_fit(&mut self) {
		self.grid.shrink_to_fit();
		self.dirty.shrink_to_fit();
		self.physics_objects.shrink_to_fit();
	}

	pub fn get(&self, handle: ObjectHandle) -> Option<&ObjectRecord<Obj>> {
		self.records.get(handle)
	}
	pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut ObjectRecord<Obj>> {
		self.records.get_mut(handle)
	}
	pub fn contains(&self, handle: ObjectHandle) -> bool {
		self.records.contains_key(handle)
	}

	/// Registers a new object, placing it in the grid immediately (not
	/// deferred to the dirty queue, since a just-added object must be
	/// findable by the very next search).
	pub fn insert(
		&mut self,
		object: Obj,
		pose: Pose,
		half_bounds: Bounds,
		dimension_kind: DimensionKind,
		is_physics: bool,
		observer_handle: Option<ObserverHandle>,
		jitter_offset: f64,
		now: f64,
	) -> ObjectHandle {
		let radius = half_bounds.radius();
		let voxel_keys = voxel_footprint(pose.position, radius, self.voxel_size);
		let record = ObjectRecord {
			object,
			pose,
			half_bounds,
			radius,
			dimension_kind,
			observer_handle,
			is_physics,
			distance: 0.0,
			voxel_keys: voxel_keys.clone(),
			desired_voxel_keys: FxHashMap::default(),
			pending_diff: None,
			last_check_clock: now,
			// Far in the past, not `now`: a just-added object must look
			// overdue (p0 tier) on its very first ingest pass rather than
			// parked, since it has never actually been updated yet.
			last_update_clock: now - 1.0e9,
			jitter_offset,
		};
		let handle = self.records.insert(record);
		for key in &voxel_keys {
			self.grid.insert(*key, handle);
		}
		if is_physics {
			self.physics_objects.push(handle);
		}
		handle
	}

	/// Removes `handle`, clearing its footprint from the grid and its
	/// slot from the physics poll list. Returns the stored object, if
	/// the handle was valid.
	pub fn remove(&mut self, handle: ObjectHandle) -> Option<Obj> {
		let record = self.records.remove(handle)?;
		for key in &record.voxel_keys {
			self.grid.remove(*key, handle);
		}
		if record.is_physics {
			if let Some(pos) = self.physics_objects.iter().position(|&h| h == handle) {
				self.physics_objects.swap_remove(pos);
			}
		}
		self.dirty.remove(handle);
		Some(record.object)
	}

	/// Applies a pose/bounds update from a [`SceneCollaborator`]
	/// observer callback or a physics poll. The voxel-membership diff is
	/// computed synchronously, right here - it is cheap, bounded work
	/// (at most nine key derivations) and the spec requires it to never
	/// be rate-limited. Only actually touching the grid with that diff
	/// is deferred to the budgeted [`Self::drain_voxel_updates`] pass.
	pub fn apply_update(&mut self, handle: ObjectHandle, pose: Pose, half_bounds: Bounds, camera_position: Vec3) {
		if let Some(record) = self.records.get_mut(handle) {
			record.pose = pose;
			record.half_bounds = half_bounds;
			record.radius = half_bounds.radius();
		}
		let Some(diff) = self.recompute_desired_voxels(handle) else {
			return;
		};
		let Some(record) = self.records.get_mut(handle) else {
			return;
		};
		match &mut record.pending_diff {
			Some(existing) => merge_diff(existing, diff),
			None => record.pending_diff = Some(diff),
		}
		let priority = manhattan_distance(record.pose.position, camera_position);
		if self.dirty.contains(handle) {
			self.dirty.update(handle, priority);
		} else {
			self.dirty.enqueue(handle, priority);
		}
	}

	/// Recomputes which voxels `handle` should occupy given its current
	/// pose and radius, without touching the grid. The footprint is the
	/// center voxel alone for small objects, or the center plus all
	/// eight bounding-corner voxels once `radius` exceeds an eighth of
	/// the voxel size (the point at which a single cell under-covers
	/// the object's extent).
	pub fn recompute_desired_voxels(&mut self, handle: ObjectHandle) -> Option<VoxelDiff> {
		let voxel_size = self.voxel_size;
		let record = self.records.get_mut(handle)?;
		let desired = voxel_footprint(record.pose.position, record.radius, voxel_size);

		record.desired_voxel_keys.clear();
		for key in &desired {
			record.desired_voxel_keys.insert(*key, true);
		}

		let mut diff = VoxelDiff::default();
		for key in &record.voxel_keys {
			if !record.desired_voxel_keys.contains_key(key) {
				diff.to_remove.push(*key);
			}
		}
		for key in &desired {
			if !record.voxel_keys.contains(key) {
				diff.to_insert.push(*key);
			}
		}
		if diff.to_insert.is_empty() && diff.to_remove.is_empty() {
			return None;
		}
		record.voxel_keys = desired;
		Some(diff)
	}

	/// Drains the dirty queue nearest-object-first, applying each
	/// already-computed [`VoxelDiff`] to the grid, until `budget_seconds`
	/// of wall time has elapsed or the queue empties. No recompute work
	/// happens here - [`Self::apply_update`] already did that
	/// unconditionally when the change was observed. Returns the number
	/// of objects whose grid membership actually changed.
	pub fn drain_voxel_updates(&mut self, budget_seconds: f64, clock: &dyn Clock) -> usize {
		let started = clock.now();
		let mut changed = 0;
		while !self.dirty.is_empty() {
			let (handle, _) = self.dirty.dequeue();
			let Some(record) = self.records.get_mut(handle) else {
				warn!("voxel update drain found a stale handle with no backing record, skipping");
				continue;
			};
			if let Some(diff) = record.pending_diff.take() {
				for key in diff.to_remove {
					self.grid.remove(key, handle);
				}
				for key in diff.to_insert {
					self.grid.insert(key, handle);
				}
				changed += 1;
			}
			if clock.now() - started >= budget_seconds {
				break;
			}
		}
		changed
	}

	/// True once every dirty object has been drained - used to decide
	/// whether a frame's budget overrun should count against
	/// `skippedIngest`-style metrics.
	pub fn has_pending_voxel_updates(&self) -> bool {
		!self.dirty.is_empty()
	}

	/// Polls physics-flagged objects round-robin, advancing a persistent
	/// cursor across calls so every physics object gets a turn over
	/// successive frames rather than always favoring the front of the
	/// list. Stops once `budget_seconds` of wall time elapses or every
	/// physics object has been polled once this call.
	pub fn poll_physics(
		&mut self,
		collaborator: &dyn SceneCollaborator<Obj>,
		budget_seconds: f64,
		clock: &dyn Clock,
		camera_position: Vec3,
	) -> usize {
		let started = clock.now();
		let total = self.physics_objects.len();
		let mut polled = 0;
		while polled < total {
			if self.physics_cursor >= self.physics_objects.len() {
				self.physics_cursor = 0;
			}
			let handle = self.physics_objects[self.physics_cursor];
			self.physics_cursor += 1;
			polled += 1;
			if let Some(record) = self.records.get(handle) {
				if let Some(update) = collaborator.poll(&record.object) {
					self.apply_update(handle, update.pose, update.bounds, camera_position);
				}
			}
			if clock.now() - started >= budget_seconds {
				break;
			}
		}
		polled
	}
}

/// Folds `new` into `existing` in place, canceling out a key that
/// appears in one diff's insert side and the other's remove side
/// rather than letting it apply twice.
fn merge_diff(existing: &mut VoxelDiff, new: VoxelDiff) {
	for key in new.to_insert {
		if let Some(pos) = existing.to_remove.iter().position(|&k| k == key) {
			existing.to_remove.remove(pos);
		} else if !existing.to_insert.contains(&key) {
			existing.to_insert.push(key);
		}
	}
	for key in new.to_remove {
		if let Some(pos) = existing.to_insert.iter().position(|&k| k == key) {
			existing.to_insert.remove(pos);
		} else if !existing.to_remove.contains(&key) {
			existing.to_remove.push(key);
		}
	}
}

/// Manhattan distance between two points - cheap priority metric for
/// the voxel-membership dirty queue, where exact Euclidean ranking
/// doesn't matter, only rough nearest-first ordering.
fn manhattan_distance(a: Vec3, b: Vec3) -> f64 {
	f64::from((a.x - b.x).abs() + (a.y - b.y).abs() + (a.z - b.z).abs())
}

/// The set of voxels an object of the given `radius` centered at
/// `position` should occupy: just the center voxel for small objects,
/// or the center plus every bounding-corner voxel once the object is
/// large enough relative to `voxel_size` that a single cell would miss
/// part of it.
fn voxel_footprint(position: glam::Vec3, radius: f32, voxel_size: f32) -> VoxelKeySet {
	let center = VoxelKey::from_world_position(position, voxel_size);
	let mut keys = VoxelKeySet::new();
	keys.push(center);
	if radius > voxel_size / 8.0 {
		for corner in crate::dimension::local_box_corners(glam::Vec3::splat(radius)) {
			let key = VoxelKey::from_world_position(position + corner, voxel_size);
			if !keys.contains(&key) {
				keys.push(key);
			}
		}
	}
	keys
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use glam::Vec3;

	fn pose_at(x: f32, y: f32, z: f32) -> Pose {
		Pose::new(Vec3::new(x, y, z), glam::Quat::IDENTITY)
	}

	#[test]
	fn small_object_occupies_single_voxel() {
		let keys = voxel_footprint(Vec3::new(1.0, 1.0, 1.0), 0.1, 16.0);
		assert_eq!(keys.len(), 1);
	}

	#[test]
	fn large_object_spans_corner_voxels() {
		let keys = voxel_footprint(Vec3::ZERO, 10.0, 16.0);
		assert!(keys.len() > 1);
	}

	#[test]
	fn insert_places_object_in_grid() {
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		let h = reg.insert(
			1,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		assert!(reg.contains(h));
		let key = VoxelKey::from_world_position(Vec3::ZERO, 16.0);
		assert!(reg.grid().voxel_at(key).unwrap().contains(&h));
	}

	#[test]
	fn remove_clears_grid_footprint() {
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		let h = reg.insert(
			1,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		reg.remove(h);
		assert!(reg.grid().is_empty());
		assert!(!reg.contains(h));
	}

	#[test]
	fn apply_update_moves_object_between_voxels_after_drain() {
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		let h = reg.insert(
			1,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		reg.apply_update(h, pose_at(100.0, 0.0, 0.0), Bounds::new(Vec3::splat(0.1)), Vec3::ZERO);
		let clock = ManualClock::new(0.0);
		reg.drain_voxel_updates(1.0, &clock);
		let old_key = VoxelKey::from_world_position(Vec3::ZERO, 16.0);
		let new_key = VoxelKey::from_world_position(Vec3::new(100.0, 0.0, 0.0), 16.0);
		assert!(!reg.grid().contains(old_key));
		assert!(reg.grid().voxel_at(new_key).unwrap().contains(&h));
	}

	#[test]
	fn physics_poll_is_round_robin_across_calls() {
		struct Collaborator;
		impl SceneCollaborator<u32> for Collaborator {
			fn resolve(&self, _: &u32) -> Option<(DimensionKind, crate::dimension::DimensionUpdate)> {
				None
			}
			fn observe(
				&mut self,
				_: &u32,
				_: Box<dyn FnMut(crate::dimension::DimensionUpdate)>,
			) -> ObserverHandle {
				ObserverHandle(0)
			}
			fn unobserve(&mut self, _: ObserverHandle) {}
			fn poll(&self, object: &u32) -> Option<crate::dimension::DimensionUpdate> {
				Some(crate::dimension::DimensionUpdate {
					pose: pose_at(*object as f32, 0.0, 0.0),
					bounds: Bounds::new(Vec3::splat(0.1)),
				})
			}
		}
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		for i in 0..3 {
			reg.insert(
				i,
				pose_at(0.0, 0.0, 0.0),
				Bounds::new(Vec3::splat(0.1)),
				DimensionKind::RigidBody,
				true,
				None,
				0.0,
				0.0,
			);
		}
		let collaborator = Collaborator;
		let clock = ManualClock::new(0.0);
		let polled = reg.poll_physics(&collaborator, 1.0, &clock, Vec3::ZERO);
		assert_eq!(polled, 3);
	}

	#[test]
	fn apply_update_computes_diff_before_any_drain_runs() {
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		let h = reg.insert(
			1,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		reg.apply_update(h, pose_at(100.0, 0.0, 0.0), Bounds::new(Vec3::splat(0.1)), Vec3::ZERO);
		// The diff is already sitting on the record - the grid hasn't
		// moved yet, but the recompute work itself is already done.
		let new_key = VoxelKey::from_world_position(Vec3::new(100.0, 0.0, 0.0), 16.0);
		let old_key = VoxelKey::from_world_position(Vec3::ZERO, 16.0);
		assert!(reg.grid().voxel_at(old_key).unwrap().contains(&h));
		assert!(!reg.grid().contains(new_key));
		assert!(reg.has_pending_voxel_updates());
	}

	#[test]
	fn drain_processes_nearest_object_to_camera_first() {
		let mut reg: ObjectRegistry<u32> = ObjectRegistry::new(16.0);
		let far = reg.insert(
			1,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		let near = reg.insert(
			2,
			pose_at(0.0, 0.0, 0.0),
			Bounds::new(Vec3::splat(0.1)),
			DimensionKind::RigidBody,
			false,
			None,
			0.0,
			0.0,
		);
		let camera = Vec3::new(0.0, 0.0, 0.0);
		// far is dirtied first but ends up much further from the camera
		// than near, dirtied second - nearest-first order should still
		// put near ahead of far in the drain.
		reg.apply_update(far, pose_at(1000.0, 0.0, 0.0), Bounds::new(Vec3::splat(0.1)), camera);
		reg.apply_update(near, pose_at(1.0, 0.0, 0.0), Bounds::new(Vec3::splat(0.1)), camera);
		assert_eq!(reg.dirty.peek(), Some(near));
	}
}
