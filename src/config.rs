use crate::error::SchedulerError;

/// Priority-queue tier boundary: any priority below this is a "p0" object
/// (missed its worst refresh rate, or is close enough to the camera that
/// it is always treated as urgent). See the ingest priority table.
pub const P0_THRESHOLD: f64 = 0.90;

/// Default mid-point of the grace window voxels are assumed to stay
/// visible for without re-running the plane test. Jittered by
/// [`GRACE_WINDOW_JITTER_FRACTION`] per check.
pub const GRACE_WINDOW_SECONDS: f64 = 0.175;
pub const GRACE_WINDOW_JITTER_FRACTION: f64 = 0.05;

/// Canonical priority-formula weights (screen size, elapsed, distance).
/// The legacy implementation this was distilled from drifted between
/// 80/18/2, 85/13/2 and 80/12/8 across drafts; 85/13/2 is the one this
/// crate implements. Exposed as `pub` so a caller who needs the other
/// drafts' behavior can build their own priority function around the
/// same inputs ([`crate::ingest::screen_size`] etc.) without forking
/// this crate.
pub const PRIORITY_WEIGHT_SCREEN_SIZE: f64 = 85.0;
pub const PRIORITY_WEIGHT_ELAPSED: f64 = 13.0;
pub const PRIORITY_WEIGHT_DISTANCE: f64 = 2.0;

/// Objects closer than this bypass the weighted formula entirely.
pub const NEARBY_DISTANCE_THRESHOLD: f64 = 30.0;

/// Any priority at or above this came from the "parked" ingest tier
/// (`elapsed <= bestRefreshRate`), whose formula is offset to always
/// land at or above 1e7 - every other tier stays under a few hundred.
/// The update iterator dequeues parked objects without yielding them:
/// they're still visible, just not due for an update yet.
pub const PARKED_PRIORITY_FLOOR: f64 = 1.0e7;

/// Window, in frames, over which `skippedSearch`/`skippedIngest`/mean
/// `objectDeltaTime` are averaged by [`crate::metrics::RollingMetrics`].
pub const ROLLING_WINDOW_FRAMES: usize = 4;

/// Per-frame time budget for draining the voxel-membership update queue.
pub const VOXEL_UPDATE_BUDGET_SECONDS: f64 = 50e-6;
/// Per-frame time budget for polling physics-flagged objects.
pub const PHYSICS_POLL_BUDGET_SECONDS: f64 = 50e-6;

/// Tunable parameters for a [`crate::Scheduler`].
///
/// All fields are private; mutate them through the validated setters so
/// an out-of-range value can be rejected instead of silently corrupting
/// scheduler state.
#[derive(Debug, Clone)]
pub struct Config {
	voxel_size: f32,
	render_distance_target: f32,
	search_time_budget: f64,
	ingest_time_budget: f64,
	update_time_budget: f64,
	best_refresh_rate: f64,
	worst_refresh_rate: f64,
	compute_visibility_only_on_demand: bool,
	strictly_enforce_worst_refresh_rate: bool,
	dynamic_render_distance: bool,
}
impl Default for Config {
	fn default() -> Self {
		Self {
			voxel_size: 16.0,
			render_distance_target: 150.0,
			search_time_budget: 0.0008,
			ingest_time_budget: 0.0015,
			update_time_budget: 0.002,
			best_refresh_rate: 1.0 / 20.0,
			worst_refresh_rate: 1.0,
			compute_visibility_only_on_demand: false,
			strictly_enforce_worst_refresh_rate: false,
			dynamic_render_distance: true,
		}
	}
}
impl Config {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn voxel_size(&self) -> f32 {
		self.voxel_size
	}
	pub fn render_distance_target(&self) -> f32 {
		self.render_distance_target
	}
	pub fn search_time_budget(&self) -> f64 {
		self.search_time_budget
	}
	pub fn ingest_time_budget(&self) -> f64 {
		self.ingest_time_budget
	}
	pub fn update_time_budget(&self) -> f64 {
		self.update_time_budget
	}
	pub fn best_refresh_rate(&self) -> f64 {
		self.best_refresh_rate
	}
	pub fn worst_refresh_rate(&self) -> f64 {
		self.worst_refresh_rate
	}
	pub fn compute_visibility_only_on_demand(&self) -> bool {
		self.compute_visibility_only_on_demand
	}
	pub fn strictly_enforce_worst_refresh_rate(&self) -> bool {
		self.strictly_enforce_worst_refresh_rate
	}
	pub fn dynamic_render_distance(&self) -> bool {
		self.dynamic_render_distance
	}

	/// Sets the voxel size. The caller (`Scheduler::set_voxel_size`) is
	/// responsible for rebuilding the grid in-place afterward - this
	/// only validates and stores the scalar.
	pub fn set_voxel_size(&mut self, size: f32) -> Result<(), SchedulerError> {
		if !(size.is_finite() && size > 0.0) {
			warn!("rejected voxel size {size}, must be finite and positive");
			return Err(SchedulerError::InvalidConfigValue {
				field: "voxel_size",
				reason: "must be finite and positive",
			});
		}
		self.voxel_size = size;
		Ok(())
	}

	pub fn set_render_distance_target(&mut self, distance: f32) -> Result<(), SchedulerError> {
		if !(distance.is_finite() && distance > 0.0) {
			warn!("rejected render distance target {distance}, must be finite and positive");
			return Err(SchedulerError::InvalidConfigValue {
				field: "render_distance_target",
				reason: "must be finite and positive",
			});
		}
		self.render_distance_target = distance;
		Ok(())
	}

	/// Sets the three cooperative time budgets, in seconds.
	pub fn set_time_budgets(
		&mut self,
		search: f64,
		ingest: f64,
		update: f64,
	) -> Result<(), SchedulerError> {
		for (field, value) in [
			("search_time_budget", search),
			("ingest_time_budget", ingest),
			("update_time_budget", update),
		] {
			if !(value.is_finite() && value >= 0.0) {
				warn!("rejected {field} of {value}, must be finite and non-negative");
				return Err(SchedulerError::InvalidConfigValue {
					field,
					reason: "must be finite and non-negative",
				});
			}
		}
		self.search_time_budget = search;
		self.ingest_time_budget = ingest;
		self.update_time_budget = update;
		Ok(())
	}

	/// Sets the best/worst refresh rates. A value greater than 2 is
	/// interpreted as Hz and inverted to a period in seconds, since
	/// nobody means a 3-second-long "refresh rate" of 3.0.
	pub fn set_refresh_rates(&mut self, best: f64, worst: f64) -> Result<(), SchedulerError> {
		let best_period = if best > 2.0 { 1.0 / best } else { best };
		let worst_period = if worst > 2.0 { 1.0 / worst } else { worst };
		if !(best_period.is_finite() && best_period >= 0.0) {
			warn!("rejected best refresh rate {best}");
			return Err(SchedulerError::InvalidConfigValue {
				field: "best_refresh_rate",
				reason: "must resolve to a finite, non-negative period",
			});
		}
		if !(worst_period.is_finite() && worst_period > best_period) {
			warn!("rejected worst refresh rate {worst} (best period {best_period})");
			return Err(SchedulerError::InvalidConfigValue {
				field: "worst_refresh_rate",
				reason: "must resolve to a period strictly greater than the best period",
			});
		}
		self.best_refresh_rate = best_period;
		self.worst_refresh_rate = worst_period;
		Ok(())
	}

	pub fn set_compute_visibility_only_on_demand(&mut self, enabled: bool) {
		self.compute_visibility_only_on_demand = enabled;
	}

	pub fn set_strictly_enforce_worst_refresh_rate(&mut self, enabled: bool) {
		self.strictly_enforce_worst_refresh_rate = enabled;
	}

	pub fn set_dynamic_render_distance(&mut self, enabled: bool) {
		self.dynamic_render_distance = enabled;
	}

	/// Midpoint between the best and worst refresh rate periods, used by
	/// [`crate::dynamic_distance::DynamicDistance`] to decide whether
	/// objects are being refreshed often enough.
	pub fn refresh_rate_midpoint(&self) -> f64 {
		(self.best_refresh_rate + self.worst_refresh_rate) / 2.0
	}
}
