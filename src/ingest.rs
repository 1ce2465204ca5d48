use rustc_hash::FxHashMap;

use crate::clock::Clock;
use crate::config::{
	NEARBY_DISTANCE_THRESHOLD, P0_THRESHOLD, PRIORITY_WEIGHT_DISTANCE, PRIORITY_WEIGHT_ELAPSED,
	PRIORITY_WEIGHT_SCREEN_SIZE,
};
use crate::handle::ObjectHandle;
use crate::priority_queue::PriorityQueue;
use crate::registry::ObjectRegistry;
use crate::voxel::VoxelKey;

/// Per-object "last seen visible" timestamps, kept across frames so
/// ingest can tell a first-time appearance (→ `ObjectEnteredView`) apart
/// from an object that was already visible last frame. Owned by the
/// caller (the scheduler), not the registry - this is ingest/visibility
/// bookkeeping, not part of an object's permanent record.
pub type VisibleNowMap = FxHashMap<ObjectHandle, f64>;

/// Computes the priority-tier value for an object. Smaller is more
/// urgent. `elapsed` is time since the object's last consumed update
/// plus its jitter offset; `best`/`worst` are the configured refresh
/// rate periods in seconds.
#[allow(clippy::too_many_arguments)]
pub fn priority(screen_size: f64, elapsed: f64, distance: f64, best: f64, worst: f64, render_distance: f64) -> f64 {
	if elapsed <= best {
		// Offset by a fixed base so this tier can never dip as low as the
		// weighted tier's ceiling (~100) even when screen_size approaches
		// 1.0 - see PARKED_PRIORITY_FLOOR.
		1.0e7 + (1.0 - screen_size) * 1.0e6
	} else if elapsed >= worst {
		P0_THRESHOLD - screen_size
	} else if distance < NEARBY_DISTANCE_THRESHOLD {
		distance / NEARBY_DISTANCE_THRESHOLD
	} else {
		let elapsed_fraction = ((elapsed - best) / (worst - best)).clamp(0.0, 1.0);
		PRIORITY_WEIGHT_SCREEN_SIZE * (1.0 - screen_size)
			+ PRIORITY_WEIGHT_ELAPSED * (1.0 - elapsed_fraction)
			+ PRIORITY_WEIGHT_DISTANCE * (distance / render_distance)
	}
}

/// Fraction of view height subtended by an object's bounding sphere.
pub fn screen_size(radius: f32, distance: f32, fov_degrees: f32) -> f64 {
	let half_fov_tan = (fov_degrees.to_radians() / 2.0).tan().max(1e-6);
	f64::from(radius / distance.max(1e-3) / half_fov_tan)
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
	pub entered_view: Vec<ObjectHandle>,
	pub skipped_ingest: usize,
}

/// Walks `visible_keys` in order (already sorted by Manhattan distance
/// from the camera voxel), scoring every object in every visible voxel
/// and staging it into `queue`'s incoming batch. Falls back to a cheap
/// synthetic priority once `ingest_time_budget` is exhausted so the
/// remaining visible voxels are still represented, just less precisely.
#[profiling::function]
#[allow(clippy::too_many_arguments)]
pub fn run_ingest<Obj>(
	registry: &mut ObjectRegistry<Obj>,
	visible_keys: &[VoxelKey],
	visible_now: &mut VisibleNowMap,
	queue: &mut PriorityQueue<ObjectHandle>,
	camera_position: glam::Vec3,
	fov_degrees: f32,
	render_distance: f32,
	best_refresh_rate: f64,
	worst_refresh_rate: f64,
	now: f64,
	ingest_time_budget: f64,
	clock: &dyn Clock,
) -> IngestOutcome {
	let started = clock.now();
	let mut outcome = IngestOutcome::default();

	for (index, &key) in visible_keys.iter().enumerate() {
		let budget_exhausted = clock.now() - started >= ingest_time_budget;
		let Some(handles) = registry.grid().voxel_at(key) else {
			continue;
		};
		let handles: Vec<ObjectHandle> = handles.to_vec();

		// Staged per-voxel rather than per-handle so the whole voxel's
		// candidates are handed to the incoming batch in one call.
		let mut voxel_batch: Vec<(ObjectHandle, f64)> = Vec::with_capacity(handles.len());

		for handle in handles {
			let Some(record) = registry.get_mut(handle) else {
				warn!("voxel grid held a handle with no backing record during ingest, skipping");
				continue;
			};
			if record.last_check_clock == now {
				continue;
			}
			record.last_check_clock = now;

			if budget_exhausted {
				// Fast-ingest: approximate spatial order via the
				// voxel's position in the already-sorted visible list,
				// skipping the full priority computation.
				if visible_now.insert(handle, now).is_none() {
					outcome.entered_view.push(handle);
				}
				voxel_batch.push((handle, index as f64));
				outcome.skipped_ingest += 1;
				continue;
			}

			let distance = record.pose.position.distance(camera_position);
			if distance > render_distance {
				continue;
			}
			record.distance = distance;
			let screen_size = screen_size(record.radius, distance, fov_degrees);
			let elapsed = now - record.last_update_clock + record.jitter_offset;

			let p = priority(
				screen_size,
				elapsed,
				f64::from(distance),
				best_refresh_rate,
				worst_refresh_rate,
				f64::from(render_distance),
			);

			if visible_now.insert(handle, now).is_none() {
				outcome.entered_view.push(handle);
			}
			voxel_batch.push((handle, p));
		}

		queue.add_multiple_to_incoming_batch(&voxel_batch);
	}

	outcome
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parked_tier_dominates_everything_else() {
		let p = priority(0.01, 0.0, 500.0, 0.05, 1.0, 150.0);
		assert!(p >= 1.0e7);
	}

	#[test]
	fn parked_tier_never_drops_to_weighted_tier_range() {
		// Even at a full-viewport screen_size the parked priority must
		// stay above anything the weighted tier can produce.
		let p = priority(1.0, 0.0, 500.0, 0.05, 1.0, 150.0);
		assert!(p >= 1.0e7);
	}

	#[test]
	fn p0_tier_is_bounded_by_threshold() {
		let p = priority(0.5, 2.0, 500.0, 0.05, 1.0, 150.0);
		assert!(p <= P0_THRESHOLD);
	}

	#[test]
	fn nearby_tier_ignores_screen_size() {
		let p = priority(0.0, 0.5, 10.0, 0.05, 1.0, 150.0);
		assert!((p - 10.0 / NEARBY_DISTANCE_THRESHOLD).abs() < 1e-9);
	}

	#[test]
	fn weighted_tier_decreases_as_screen_size_grows() {
		let low = priority(0.1, 0.5, 100.0, 0.05, 1.0, 150.0);
		let high = priority(0.9, 0.5, 100.0, 0.05, 1.0, 150.0);
		assert!(high < low);
	}

	#[test]
	fn weighted_tier_decreases_as_elapsed_approaches_worst() {
		let early = priority(0.5, 0.2, 100.0, 0.05, 1.0, 150.0);
		let late = priority(0.5, 0.9, 100.0, 0.05, 1.0, 150.0);
		assert!(late < early);
	}
}
