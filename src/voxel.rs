use std::hash::{Hash, Hasher};

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;

use crate::handle::ObjectHandle;

/// Integer coordinates of a cubic cell of a [`VoxelGrid`], equal to
/// `floor(world_position / voxel_size)` componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelKey(pub IVec3);
impl VoxelKey {
	pub fn new(i: i32, j: i32, k: i32) -> Self {
		Self(IVec3::new(i, j, k))
	}

	/// Key of the voxel containing `world_position`.
	pub fn from_world_position(world_position: Vec3, voxel_size: f32) -> Self {
		Self((world_position / voxel_size).floor().as_ivec3())
	}

	pub fn manhattan_distance(self, other: VoxelKey) -> i64 {
		let d = (self.0 - other.0).abs();
		i64::from(d.x) + i64::from(d.y) + i64::from(d.z)
	}

	/// World-space center of this voxel.
	pub fn center(self, voxel_size: f32) -> Vec3 {
		(self.0.as_vec3() + Vec3::splat(0.5)) * voxel_size
	}
}

/// 64-bit splitmix-style mix of the packed key components. Plain
/// multiplicative hashing on a 3D integer triple clusters badly along
/// grid-aligned axes; this spreads bits from all three components before
/// a generic hasher ever sees them.
fn splitmix64(mut x: u64) -> u64 {
	x = x.wrapping_add(0x9E3779B97F4A7C15);
	x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
	x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
	x ^ (x >> 31)
}

impl Hash for VoxelKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		let packed = (u64::from(self.0.x as u32))
			| (u64::from(self.0.y as u32) << 21)
			| (u64::from(self.0.z as u32) << 42);
		state.write_u64(splitmix64(packed));
	}
}

/// Sparse mapping from [`VoxelKey`] to the object handles currently
/// occupying that voxel.
///
/// No empty lists are retained: a key with nothing in it is simply
/// absent from the map, so `len()` is a true count of occupied voxels.
#[derive(Debug, Default)]
pub struct VoxelGrid {
	voxels: FxHashMap<VoxelKey, Vec<ObjectHandle>>,
}
impl VoxelGrid {
	pub fn new() -> Self {
		Self {
			voxels: FxHashMap::default(),
		}
	}

	pub fn voxel_at(&self, key: VoxelKey) -> Option<&[ObjectHandle]> {
		self.voxels.get(&key).map(Vec::as_slice)
	}

	pub fn contains(&self, key: VoxelKey) -> bool {
		self.voxels.contains_key(&key)
	}

	pub fn len(&self) -> usize {
		self.voxels.len()
	}
	pub fn is_empty(&self) -> bool {
		self.voxels.is_empty()
	}

	/// Adds `object` to the voxel at `key`. Does not check for
	/// duplicates: callers (the registry's desired-voxel-keys protocol)
	/// are responsible for never inserting the same handle into the
	/// same key twice.
	pub fn insert(&mut self, key: VoxelKey, object: ObjectHandle) {
		self.voxels.entry(key).or_default().push(object);
	}

	/// Removes `object` from the voxel at `key` via swap-with-last.
	/// Drops the voxel entirely once it becomes empty.
	pub fn remove(&mut self, key: VoxelKey, object: ObjectHandle) {
		let Some(list) = self.voxels.get_mut(&key) else {
			return;
		};
		if let Some(pos) = list.iter().position(|&h| h == object) {
			list.swap_remove(pos);
		}
		if list.is_empty() {
			self.voxels.remove(&key);
		}
	}

	pub fn shrink_to_fit(&mut self) {
		self.voxels.shrink_to_fit();
	}

	/// Occupied keys whose components all fall within `[min, max]`
	/// inclusive. Walks the sparse occupied-key set rather than the
	/// (possibly enormous) coordinate range, since most of a partition
	/// volume is typically empty space.
	pub fn keys_in_box<'a>(&'a self, min: VoxelKey, max: VoxelKey) -> impl Iterator<Item = VoxelKey> + 'a {
		self.voxels.keys().copied().filter(move |k| {
			k.0.x >= min.0.x
				&& k.0.x <= max.0.x
				&& k.0.y >= min.0.y
				&& k.0.y <= max.0.y
				&& k.0.z >= min.0.z
				&& k.0.z <= max.0.z
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn handle_at(i: u32) -> ObjectHandle {
		use slotmap::SlotMap;
		let mut sm: SlotMap<ObjectHandle, ()> = SlotMap::with_key();
		let mut h = sm.insert(());
		for _ in 0..i {
			h = sm.insert(());
		}
		h
	}

	#[test]
	fn insert_then_remove_drops_empty_voxel() {
		let mut grid = VoxelGrid::new();
		let key = VoxelKey::new(1, 2, 3);
		let h = handle_at(0);
		grid.insert(key, h);
		assert!(grid.contains(key));
		grid.remove(key, h);
		assert!(!grid.contains(key));
	}

	#[test]
	fn remove_swaps_with_last() {
		let mut grid = VoxelGrid::new();
		let key = VoxelKey::new(0, 0, 0);
		let a = handle_at(0);
		let b = handle_at(1);
		let c = handle_at(2);
		grid.insert(key, a);
		grid.insert(key, b);
		grid.insert(key, c);
		grid.remove(key, a);
		let remaining = grid.voxel_at(key).unwrap();
		assert_eq!(remaining.len(), 2);
		assert!(remaining.contains(&b));
		assert!(remaining.contains(&c));
	}

	#[test]
	fn from_world_position_floors_toward_negative_infinity() {
		let k = VoxelKey::from_world_position(Vec3::new(-0.1, 0.0, 15.9), 10.0);
		assert_eq!(k, VoxelKey::new(-1, 0, 1));
	}

	#[test]
	fn manhattan_distance_is_symmetric() {
		let a = VoxelKey::new(0, 0, 0);
		let b = VoxelKey::new(3, -2, 1);
		assert_eq!(a.manhattan_distance(b), 6);
		assert_eq!(b.manhattan_distance(a), 6);
	}
}
