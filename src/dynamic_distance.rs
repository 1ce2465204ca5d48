use crate::metrics::RollingMetrics;

/// Keeps `renderDistance` within `[target/3, target*5]` and nudges it
/// frame to frame based on whether the last few frames' measured
/// budgets were met, closing the loop between [`crate::frustum`]/
/// [`crate::ingest`] performance and how much world the search and
/// ingest passes are asked to cover.
#[derive(Debug)]
pub struct DynamicDistance {
	render_distance: f32,
}
impl DynamicDistance {
	pub fn new(render_distance_target: f32) -> Self {
		Self {
			render_distance: render_distance_target,
		}
	}

	pub fn render_distance(&self) -> f32 {
		self.render_distance
	}

	/// Re-evaluates `renderDistance` for the next frame given this
	/// frame's rolling metrics and configured budgets. `best_refresh_rate`
	/// and `refresh_rate_midpoint` are periods in seconds, matching
	/// [`crate::config::Config`]'s convention.
	#[allow(clippy::too_many_arguments)]
	pub fn update(
		&mut self,
		metrics: &RollingMetrics,
		render_distance_target: f32,
		search_time_budget: f64,
		ingest_time_budget: f64,
		best_refresh_rate: f64,
		refresh_rate_midpoint: f64,
	) {
		let min = render_distance_target / 3.0;
		let max = render_distance_target * 5.0;

		let over_budget = metrics.avg_skipped_search() > 0.0
			|| metrics.avg_skipped_ingest() > 0.0
			|| metrics.avg_object_delta() >= refresh_rate_midpoint
			|| metrics.last_search_duration() > search_time_budget
			|| metrics.last_ingest_duration() > ingest_time_budget;

		if over_budget {
			self.render_distance -= 0.03 * render_distance_target;
		} else if metrics.avg_object_delta() <= best_refresh_rate {
			self.render_distance += 0.015 * render_distance_target;
		}

		self.render_distance = self.render_distance.clamp(min, max);
	}
}
