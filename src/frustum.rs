use arrayvec::ArrayVec;
use glam::{IVec3, Vec3};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::clock::Clock;
use crate::dimension::{CameraSource, Pose};
use crate::voxel::{VoxelGrid, VoxelKey};

const EPSILON: f32 = 1e-4;

/// One side of a [`Frustum`]: a point known to lie on the plane and a
/// normal oriented so that increasing distance along it moves away
/// from the frustum's interior (see [`box_vs_frustum`]).
#[derive(Debug, Clone, Copy)]
pub struct Plane {
	pub point: Vec3,
	pub normal: Vec3,
}

/// The view volume: left, right, top, bottom and far planes. There is
/// deliberately no near plane - objects behind the camera are filtered
/// by distance during ingest instead.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
	pub planes: [Plane; 5],
	/// The four far-plane corners, kept around so the caller can build
	/// the voxel-space search bound without re-deriving the geometry.
	pub far_corners: [Vec3; 4],
	pub apex: Vec3,
}
impl Frustum {
	/// Builds a frustum from a camera pose, vertical field of view (in
	/// degrees) and aspect ratio, out to `render_distance`. A FOV under
	/// 60 degrees should have `render_distance` pre-scaled by the
	/// caller (see [`scaled_render_distance`]) to compensate for the
	/// narrower view before calling this.
	pub fn new(camera_pose: Pose, fov_degrees: f32, aspect_ratio: f32, render_distance: f32) -> Self {
		let forward = camera_pose.orientation * Vec3::NEG_Z;
		let up = camera_pose.orientation * Vec3::Y;
		let right = camera_pose.orientation * Vec3::X;
		let position = camera_pose.position;

		let half_v = (fov_degrees.to_radians() / 2.0).tan();
		let half_h = half_v * aspect_ratio;

		let far_center = position + forward * render_distance;
		let far_right = right * (half_h * render_distance);
		let far_up = up * (half_v * render_distance);

		let corner_tr = far_center + far_right + far_up;
		let corner_tl = far_center - far_right + far_up;
		let corner_br = far_center + far_right - far_up;
		let corner_bl = far_center - far_right - far_up;

		let plane_through_apex = |span_a: Vec3, span_b: Vec3| -> Plane {
			let mut normal = span_a.cross(span_b).normalize_or_zero();
			if normal.dot(far_center - position) > 0.0 {
				normal = -normal;
			}
			Plane { point: position, normal }
		};

		Self {
			planes: [
				plane_through_apex(corner_bl - position, corner_tl - position), // left
				plane_through_apex(corner_tr - position, corner_br - position), // right
				plane_through_apex(corner_tl - position, corner_tr - position), // top
				plane_through_apex(corner_br - position, corner_bl - position), // bottom
				Plane {
					point: far_center,
					normal: forward,
				},
			],
			far_corners: [corner_tl, corner_tr, corner_bl, corner_br],
			apex: position,
		}
	}
}

/// Scales `render_distance` to compensate for a narrow field of view,
/// per the "if FOV < 60 degrees" design note.
pub fn scaled_render_distance(render_distance: f32, fov_degrees: f32) -> f32 {
	if fov_degrees < 60.0 {
		render_distance * (2.0 - fov_degrees / 60.0)
	} else {
		render_distance
	}
}

/// Tests an axis-aligned world-space box against every plane of
/// `frustum`. Returns `(intersects, completely_inside)`; the second
/// value is meaningful only when `track_completely_inside` is set -
/// the single-voxel fast path doesn't need it and skips the extra
/// bookkeeping.
pub fn box_vs_frustum(
	center: Vec3,
	half_extents: Vec3,
	frustum: &Frustum,
	track_completely_inside: bool,
) -> (bool, bool) {
	let mut completely_inside = true;
	for plane in &frustum.planes {
		let d = (center - plane.point).dot(plane.normal);
		let r = (half_extents.x * plane.normal.x).abs()
			+ (half_extents.y * plane.normal.y).abs()
			+ (half_extents.z * plane.normal.z).abs();
		if d > r + EPSILON {
			return (false, false);
		}
		if track_completely_inside && d + r > EPSILON {
			completely_inside = false;
		}
	}
	(true, track_completely_inside && completely_inside)
}

/// A rectangular run of voxel coordinates, inclusive on both ends.
/// The unit of work for the recursive partition search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Volume {
	min: IVec3,
	max: IVec3,
}
impl Volume {
	fn size(&self) -> IVec3 {
		self.max - self.min + IVec3::ONE
	}

	fn is_single_voxel(&self) -> bool {
		self.min == self.max
	}

	fn world_box(&self, voxel_size: f32) -> (Vec3, Vec3) {
		let min_world = self.min.as_vec3() * voxel_size;
		let max_world = (self.max + IVec3::ONE).as_vec3() * voxel_size;
		let center = (min_world + max_world) / 2.0;
		let half_extents = (max_world - min_world) / 2.0;
		(center, half_extents)
	}

	fn longest_axis(&self) -> usize {
		let s = self.size();
		if s.x >= s.y && s.x >= s.z {
			0
		} else if s.y >= s.z {
			1
		} else {
			2
		}
	}

	/// Splits along the longest axis at its midpoint, producing two
	/// children whose union is this volume.
	fn split_longest_axis(&self) -> (Volume, Volume) {
		let axis = self.longest_axis();
		let mut low_max = self.max;
		let mut high_min = self.min;
		let mid = self.min[axis] + (self.max[axis] - self.min[axis]) / 2;
		low_max[axis] = mid;
		high_min[axis] = mid + 1;
		(
			Volume {
				min: self.min,
				max: low_max,
			},
			Volume {
				min: high_min,
				max: self.max,
			},
		)
	}

	/// Splits every axis at its midpoint into the 8 octants of this
	/// volume. Only valid when every axis has width greater than one -
	/// callers check [`Volume::is_single_voxel`]-adjacent sizing first.
	/// Always produces exactly 8 children, so an `ArrayVec` never spills.
	fn octants(&self) -> ArrayVec<Volume, 8> {
		let mid = IVec3::new(
			self.min.x + (self.max.x - self.min.x) / 2,
			self.min.y + (self.max.y - self.min.y) / 2,
			self.min.z + (self.max.z - self.min.z) / 2,
		);
		let ranges_x = [(self.min.x, mid.x), (mid.x + 1, self.max.x)];
		let ranges_y = [(self.min.y, mid.y), (mid.y + 1, self.max.y)];
		let ranges_z = [(self.min.z, mid.z), (mid.z + 1, self.max.z)];
		let mut out = ArrayVec::new();
		for &(x0, x1) in &ranges_x {
			for &(y0, y1) in &ranges_y {
				for &(z0, z1) in &ranges_z {
					out.push(Volume {
						min: IVec3::new(x0, y0, z0),
						max: IVec3::new(x1, y1, z1),
					});
				}
			}
		}
		out
	}

	fn all_axes_wider_than_one(&self) -> bool {
		let s = self.size();
		s.x > 1 && s.y > 1 && s.z > 1
	}
}

/// Drives the time-budgeted, temporally-cached frustum search and owns
/// the voxel-visibility cache and sorted visible-key list between
/// frames.
#[derive(Debug)]
pub struct FrustumSearch {
	last_visible: FxHashMap<VoxelKey, f64>,
	visible_keys: Vec<VoxelKey>,
	visible_set: FxHashSet<VoxelKey>,
	rng: Xoshiro256PlusPlus,
	skipped_search: usize,
}
impl FrustumSearch {
	pub fn new(seed: u64) -> Self {
		Self {
			last_visible: FxHashMap::default(),
			visible_keys: Vec::new(),
			visible_set: FxHashSet::default(),
			rng: Xoshiro256PlusPlus::seed_from_u64(seed),
			skipped_search: 0,
		}
	}

	pub fn visible_keys(&self) -> &[VoxelKey] {
		&self.visible_keys
	}

	pub fn skipped_search(&self) -> usize {
		self.skipped_search
	}

	fn jittered_grace(&mut self, grace_window: f64, jitter_fraction: f64) -> f64 {
		let jitter = self.rng.gen_range(-jitter_fraction..=jitter_fraction);
		grace_window * (1.0 + jitter)
	}

	fn mark_visible(&mut self, key: VoxelKey, camera_voxel: VoxelKey) {
		if !self.visible_set.insert(key) {
			return;
		}
		let d = camera_voxel.manhattan_distance(key);
		let pos = self
			.visible_keys
			.partition_point(|&k| camera_voxel.manhattan_distance(k) < d);
		self.visible_keys.insert(pos, key);
	}

	/// Runs one full (possibly budget-truncated) search pass, replacing
	/// the previous frame's visible-key list.
	#[profiling::function]
	#[allow(clippy::too_many_arguments)]
	pub fn run(
		&mut self,
		grid: &VoxelGrid,
		camera: &dyn CameraSource,
		voxel_size: f32,
		render_distance_target: f32,
		grace_window: f64,
		grace_jitter_fraction: f64,
		search_time_budget: f64,
		clock: &dyn Clock,
	) {
		let now = clock.now();
		let deadline = now + search_time_budget;

		self.visible_keys.clear();
		self.visible_set.clear();
		self.skipped_search = 0;

		let camera_pose = camera.pose();
		let fov = camera.fov_degrees();
		let render_distance = scaled_render_distance(render_distance_target, fov);
		let frustum = Frustum::new(camera_pose, fov, camera.aspect_ratio(), render_distance);
		let camera_voxel = VoxelKey::from_world_position(camera_pose.position, voxel_size);

		let bounds = frustum_voxel_bounds(&frustum, voxel_size);
		let mut worklist: Vec<Volume> = Vec::new();
		if bounds.all_axes_wider_than_one() {
			worklist.extend(shuffled(bounds.octants(), &mut self.rng));
		} else {
			worklist.push(bounds);
		}

		while let Some(volume) = worklist.pop() {
			if volume.is_single_voxel() {
				let key = VoxelKey::new(volume.min.x, volume.min.y, volume.min.z);
				self.visit_single(key, grid, &frustum, voxel_size, camera_voxel, grace_window, grace_jitter_fraction, now);
			} else {
				self.visit_multi(
					volume,
					grid,
					&frustum,
					voxel_size,
					camera_voxel,
					grace_window,
					grace_jitter_fraction,
					now,
					&mut worklist,
				);
			}

			if clock.now() >= deadline {
				break;
			}
		}

		// Best-effort stale reuse for anything the budget cut off.
		for volume in worklist.drain(..) {
			self.skipped_search += 1;
			for key in grid.keys_in_box(
				VoxelKey::new(volume.min.x, volume.min.y, volume.min.z),
				VoxelKey::new(volume.max.x, volume.max.y, volume.max.z),
			) {
				if self.last_visible.contains_key(&key) {
					self.mark_visible(key, camera_voxel);
				}
			}
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn visit_single(
		&mut self,
		key: VoxelKey,
		grid: &VoxelGrid,
		frustum: &Frustum,
		voxel_size: f32,
		camera_voxel: VoxelKey,
		grace_window: f64,
		grace_jitter_fraction: f64,
		now: f64,
	) {
		if !grid.contains(key) {
			return;
		}
		if let Some(&last) = self.last_visible.get(&key) {
			let grace = self.jittered_grace(grace_window, grace_jitter_fraction);
			if now - last < grace {
				self.mark_visible(key, camera_voxel);
				return;
			}
		}
		let (center, half_extents) = Volume { min: key.0, max: key.0 }.world_box(voxel_size);
		let (intersects, _) = box_vs_frustum(center, half_extents, frustum, false);
		if intersects {
			self.last_visible.insert(key, now);
			self.mark_visible(key, camera_voxel);
		} else {
			self.last_visible.remove(&key);
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn visit_multi(
		&mut self,
		volume: Volume,
		grid: &VoxelGrid,
		frustum: &Frustum,
		voxel_size: f32,
		camera_voxel: VoxelKey,
		grace_window: f64,
		grace_jitter_fraction: f64,
		now: f64,
		worklist: &mut Vec<Volume>,
	) {
		let contained: SmallVec<[VoxelKey; 16]> = grid
			.keys_in_box(
				VoxelKey::new(volume.min.x, volume.min.y, volume.min.z),
				VoxelKey::new(volume.max.x, volume.max.y, volume.max.z),
			)
			.collect();
		if contained.is_empty() {
			return;
		}

		let grace = self.jittered_grace(grace_window, grace_jitter_fraction);
		let all_cached = contained
			.iter()
			.all(|k| self.last_visible.get(k).is_some_and(|&last| now - last < grace));
		if all_cached {
			for &key in &contained {
				self.last_visible.insert(key, now);
				self.mark_visible(key, camera_voxel);
			}
			return;
		}

		let (center, half_extents) = volume.world_box(voxel_size);
		let (intersects, completely_inside) = box_vs_frustum(center, half_extents, frustum, true);
		if !intersects {
			for key in &contained {
				self.last_visible.remove(key);
			}
			return;
		}
		if completely_inside {
			for &key in &contained {
				self.last_visible.insert(key, now);
				self.mark_visible(key, camera_voxel);
			}
			return;
		}

		let (mut a, mut b) = volume.split_longest_axis();
		if self.rng.gen::<bool>() {
			std::mem::swap(&mut a, &mut b);
		}
		worklist.push(a);
		worklist.push(b);
	}
}

fn shuffled(mut items: ArrayVec<Volume, 8>, rng: &mut Xoshiro256PlusPlus) -> ArrayVec<Volume, 8> {
	for i in (1..items.len()).rev() {
		let j = rng.gen_range(0..=i);
		items.swap(i, j);
	}
	items
}

/// The axis-aligned box enclosing the camera position and the four
/// far-plane corners, in voxel coordinates.
fn frustum_voxel_bounds(frustum: &Frustum, voxel_size: f32) -> Volume {
	let mut min = frustum.apex;
	let mut max = frustum.apex;
	for &corner in &frustum.far_corners {
		min = min.min(corner);
		max = max.max(corner);
	}
	let min_key = VoxelKey::from_world_position(min, voxel_size);
	let max_key = VoxelKey::from_world_position(max, voxel_size);
	Volume {
		min: min_key.0,
		max: max_key.0,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::handle::ObjectHandle;
	use glam::Quat;
	use slotmap::SlotMap;

	fn handle() -> ObjectHandle {
		let mut sm: SlotMap<ObjectHandle, ()> = SlotMap::with_key();
		sm.insert(())
	}

	struct StubCamera {
		pose: Pose,
		fov: f32,
		aspect: f32,
	}
	impl CameraSource for StubCamera {
		fn pose(&self) -> Pose {
			self.pose
		}
		fn fov_degrees(&self) -> f32 {
			self.fov
		}
		fn aspect_ratio(&self) -> f32 {
			self.aspect
		}
	}

	fn looking_down_neg_z(z: f32) -> Pose {
		Pose::new(Vec3::new(0.0, 0.0, z), Quat::IDENTITY)
	}

	#[test]
	fn voxel_wholly_inside_frustum_is_completely_inside() {
		let camera = looking_down_neg_z(10.0);
		let frustum = Frustum::new(camera, 90.0, 1.0, 50.0);
		let (intersects, completely_inside) = box_vs_frustum(Vec3::ZERO, Vec3::splat(0.4), &frustum, true);
		assert!(intersects);
		assert!(completely_inside);
	}

	#[test]
	fn voxel_wholly_outside_frustum_is_excluded() {
		let camera = looking_down_neg_z(10.0);
		let frustum = Frustum::new(camera, 60.0, 1.0, 50.0);
		let (intersects, completely_inside) = box_vs_frustum(Vec3::new(1000.0, 1000.0, 1000.0), Vec3::splat(1.0), &frustum, true);
		assert!(!intersects);
		assert!(!completely_inside);
	}

	#[test]
	fn scaled_render_distance_widens_for_narrow_fov() {
		let scaled = scaled_render_distance(100.0, 30.0);
		assert!((scaled - 150.0).abs() < 1e-4);
		assert_eq!(scaled_render_distance(100.0, 90.0), 100.0);
	}

	#[test]
	fn search_finds_single_static_voxel() {
		let mut grid = VoxelGrid::new();
		let key = VoxelKey::new(0, 0, 0);
		grid.insert(key, handle());

		let camera = StubCamera {
			pose: looking_down_neg_z(10.0),
			fov: 60.0,
			aspect: 1.0,
		};

		let mut search = FrustumSearch::new(42);
		let clock = ManualClock::new(0.0);
		search.run(&grid, &camera, 10.0, 50.0, 0.175, 0.05, 1.0, &clock);

		assert_eq!(search.visible_keys(), &[key]);
	}
}
