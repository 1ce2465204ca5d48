use std::collections::VecDeque;

use crate::config::ROLLING_WINDOW_FRAMES;

/// An object's `objectDeltaTime` sample is excluded from the mean once
/// it reaches this age - such an object was simply out of view for a
/// while, not slow to update.
const OUTLIER_DELTA_SECONDS: f64 = 1.0;

/// Rolling window over the last [`ROLLING_WINDOW_FRAMES`] frames of
/// `skippedSearch`, `skippedIngest`, and mean `objectDeltaTime`, feeding
/// [`crate::dynamic_distance::DynamicDistance`]'s reduce/hold/increase
/// decision.
#[derive(Debug, Default)]
pub struct RollingMetrics {
	skipped_search: VecDeque<usize>,
	skipped_ingest: VecDeque<usize>,
	object_delta_samples: Vec<f64>,
	mean_object_delta: VecDeque<f64>,
	last_search_duration: f64,
	last_ingest_duration: f64,
}
impl RollingMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one frame's worth of measurements, pushing all three
	/// rolling series and evicting anything past the window.
	pub fn record_frame(&mut self, skipped_search: usize, skipped_ingest: usize, search_duration: f64, ingest_duration: f64) {
		self.last_search_duration = search_duration;
		self.last_ingest_duration = ingest_duration;

		Self::push_bounded(&mut self.skipped_search, skipped_search);
		Self::push_bounded(&mut self.skipped_ingest, skipped_ingest);

		let mean = self.drain_object_delta_mean();
		Self::push_bounded(&mut self.mean_object_delta, mean);
	}

	/// Accumulates one `objectDeltaTime` sample from the update
	/// iterator, to be folded into this frame's mean on
	/// [`Self::record_frame`]. Samples at or beyond
	/// [`OUTLIER_DELTA_SECONDS`] are dropped.
	pub fn sample_object_delta(&mut self, dt: f64) {
		if dt < OUTLIER_DELTA_SECONDS {
			self.object_delta_samples.push(dt);
		}
	}

	fn drain_object_delta_mean(&mut self) -> f64 {
		if self.object_delta_samples.is_empty() {
			return 0.0;
		}
		let sum: f64 = self.object_delta_samples.iter().sum();
		let mean = sum / self.object_delta_samples.len() as f64;
		self.object_delta_samples.clear();
		mean
	}

	fn push_bounded<T>(series: &mut VecDeque<T>, value: T) {
		series.push_back(value);
		while series.len() > ROLLING_WINDOW_FRAMES {
			series.pop_front();
		}
	}

	fn mean_usize(series: &VecDeque<usize>) -> f64 {
		if series.is_empty() {
			return 0.0;
		}
		series.iter().sum::<usize>() as f64 / series.len() as f64
	}

	pub fn avg_skipped_search(&self) -> f64 {
		Self::mean_usize(&self.skipped_search)
	}
	pub fn avg_skipped_ingest(&self) -> f64 {
		Self::mean_usize(&self.skipped_ingest)
	}
	pub fn avg_object_delta(&self) -> f64 {
		if self.mean_object_delta.is_empty() {
			return 0.0;
		}
		self.mean_object_delta.iter().sum::<f64>() / self.mean_object_delta.len() as f64
	}
	pub fn last_search_duration(&self) -> f64 {
		self.last_search_duration
	}
	pub fn last_ingest_duration(&self) -> f64 {
		self.last_ingest_duration
	}
}
