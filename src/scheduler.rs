use std::cell::RefCell;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::clock::Clock;
use crate::config::{
	Config, GRACE_WINDOW_JITTER_FRACTION, GRACE_WINDOW_SECONDS, P0_THRESHOLD, PARKED_PRIORITY_FLOOR,
	PHYSICS_POLL_BUDGET_SECONDS, VOXEL_UPDATE_BUDGET_SECONDS,
};
use crate::dimension::{CameraSource, DimensionUpdate, SceneCollaborator};
use crate::dynamic_distance::DynamicDistance;
use crate::error::SchedulerError;
use crate::frustum::FrustumSearch;
use crate::handle::ObjectHandle;
use crate::ingest::{run_ingest, VisibleNowMap};
use crate::metrics::RollingMetrics;
use crate::priority_queue::PriorityQueue;
use crate::registry::ObjectRegistry;

/// How often scratch buffers are shrunk back down, in seconds of
/// scheduler-clock time.
const SCRATCH_SHRINK_INTERVAL_SECONDS: f64 = 5.0;
/// Bound on a newly-registered object's jitter offset, in seconds.
const JITTER_OFFSET_SECONDS: f64 = 0.002;

type PendingUpdates = Rc<RefCell<Vec<(ObjectHandle, DimensionUpdate)>>>;

/// Orchestrates one full frame of the visibility and update pipeline:
/// draining pending pose/bounds changes, running the frustum search and
/// ingest, firing visibility transition events, and tuning render
/// distance - then exposes [`Self::get_visible_objects`] and
/// [`Self::iterate_objects_to_update`] for the caller's render loop to
/// consume the results.
pub struct Scheduler<Obj, Collab, Cam, Clk> {
	config: Config,
	registry: ObjectRegistry<Obj>,
	visible_queue: PriorityQueue<ObjectHandle>,
	frustum_search: FrustumSearch,
	visible_now: VisibleNowMap,
	metrics: RollingMetrics,
	dynamic_distance: DynamicDistance,

	collaborator: Collab,
	camera: Cam,
	clock: Clk,
	rng: Xoshiro256PlusPlus,

	pending_updates: PendingUpdates,

	ran_this_frame: bool,
	batch_enqueued_this_frame: bool,
	iter_started: f64,
	last_scratch_shrink: f64,

	on_object_added: Option<Box<dyn FnMut(&Obj)>>,
	on_object_removed: Option<Box<dyn FnMut(&Obj)>>,
	on_object_entered_view: Option<Box<dyn FnMut(&Obj)>>,
	on_object_exited_view: Option<Box<dyn FnMut(&Obj)>>,
}

impl<Obj, Collab, Cam, Clk> Scheduler<Obj, Collab, Cam, Clk>
where
	Collab: SceneCollaborator<Obj>,
	Cam: CameraSource,
	Clk: Clock,
{
	pub fn new(config: Config, collaborator: Collab, camera: Cam, clock: Clk, seed: u64) -> Self {
		let voxel_size = config.voxel_size();
		let render_distance_target = config.render_distance_target();
		Self {
			registry: ObjectRegistry::new(voxel_size),
			visible_queue: PriorityQueue::new(),
			frustum_search: FrustumSearch::new(seed),
			visible_now: VisibleNowMap::default(),
			metrics: RollingMetrics::new(),
			dynamic_distance: DynamicDistance::new(render_distance_target),
			config,
			collaborator,
			camera,
			clock,
			rng: Xoshiro256PlusPlus::seed_from_u64(seed ^ 0xD1B5_4A32_D192_ED03),
			pending_updates: Rc::new(RefCell::new(Vec::new())),
			ran_this_frame: false,
			batch_enqueued_this_frame: false,
			iter_started: 0.0,
			last_scratch_shrink: 0.0,
			on_object_added: None,
			on_object_removed: None,
			on_object_entered_view: None,
			on_object_exited_view: None,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}
	pub fn render_distance(&self) -> f32 {
		self.dynamic_distance.render_distance()
	}
	/// Rolling-window performance counters from the last few frames -
	/// useful for a debug overlay or for deciding whether to relax
	/// budgets, independent of the dynamic render distance this crate
	/// already derives from them.
	pub fn metrics(&self) -> &RollingMetrics {
		&self.metrics
	}
	pub fn len(&self) -> usize {
		self.registry.len()
	}
	pub fn is_empty(&self) -> bool {
		self.registry.is_empty()
	}

	pub fn on_object_added(&mut self, cb: impl FnMut(&Obj) + 'static) {
		self.on_object_added = Some(Box::new(cb));
	}
	pub fn on_object_removed(&mut self, cb: impl FnMut(&Obj) + 'static) {
		self.on_object_removed = Some(Box::new(cb));
	}
	pub fn on_object_entered_view(&mut self, cb: impl FnMut(&Obj) + 'static) {
		self.on_object_entered_view = Some(Box::new(cb));
	}
	pub fn on_object_exited_view(&mut self, cb: impl FnMut(&Obj) + 'static) {
		self.on_object_exited_view = Some(Box::new(cb));
	}

	fn has_visibility_listener(&self) -> bool {
		self.on_object_entered_view.is_some() || self.on_object_exited_view.is_some()
	}

	pub fn add_object(&mut self, object: Obj) -> Result<ObjectHandle, SchedulerError> {
		self.insert_object(object, false)
	}

	pub fn add_physics_object(&mut self, object: Obj) -> Result<ObjectHandle, SchedulerError> {
		self.insert_object(object, true)
	}

	fn insert_object(&mut self, object: Obj, is_physics: bool) -> Result<ObjectHandle, SchedulerError> {
		let Some((kind, update)) = self.collaborator.resolve(&object) else {
			return Err(SchedulerError::NotAddable);
		};
		let now = self.clock.now();
		let jitter = self.rng.gen_range(-JITTER_OFFSET_SECONDS..=JITTER_OFFSET_SECONDS);
		let handle = self.registry.insert(
			object,
			update.pose,
			update.bounds,
			kind,
			is_physics,
			None,
			jitter,
			now,
		);

		let pending = Rc::clone(&self.pending_updates);
		let observer_handle = {
			let object_ref = &self.registry.get(handle).expect("just inserted").object;
			self.collaborator.observe(
				object_ref,
				Box::new(move |update: DimensionUpdate| {
					pending.borrow_mut().push((handle, update));
				}),
			)
		};
		if let Some(record) = self.registry.get_mut(handle) {
			record.observer_handle = Some(observer_handle);
		}

		if let (Some(cb), Some(record)) = (&mut self.on_object_added, self.registry.get(handle)) {
			cb(&record.object);
		}
		Ok(handle)
	}

	pub fn remove_object(&mut self, handle: ObjectHandle) -> Option<Obj> {
		let observer_handle = self.registry.get(handle)?.observer_handle;
		if let Some(oh) = observer_handle {
			self.collaborator.unobserve(oh);
		}
		self.visible_queue.remove(handle);
		self.visible_now.remove(&handle);
		let object = self.registry.remove(handle)?;
		if let Some(cb) = &mut self.on_object_removed {
			cb(&object);
		}
		Some(object)
	}

	/// Drains callback-delivered pose/bounds changes into the registry.
	/// Exceptions are not a concept here, but a panicking observer
	/// would already have unwound before reaching this point - this
	/// only ever sees well-formed queued updates.
	fn drain_pending_updates(&mut self) {
		let camera_position = self.camera.pose().position;
		let updates = std::mem::take(&mut *self.pending_updates.borrow_mut());
		for (handle, update) in updates {
			self.registry.apply_update(handle, update.pose, update.bounds, camera_position);
		}
	}

	/// Called once per rendered frame by the host render loop, before
	/// rendering begins. Runs the full pipeline immediately unless
	/// `computeVisibilityOnlyOnDemand` defers it to the first
	/// `GetVisibleObjects`/`IterateObjectsToUpdate` call this frame.
	pub fn begin_frame(&mut self) {
		self.ran_this_frame = false;
		self.batch_enqueued_this_frame = false;
		if !(self.config.compute_visibility_only_on_demand() && !self.has_visibility_listener()) {
			self.run_frame();
		}
	}

	fn ensure_ran(&mut self) {
		if !self.ran_this_frame {
			self.run_frame();
		}
	}

	#[profiling::function]
	fn run_frame(&mut self) {
		let now = self.clock.now();
		self.drain_pending_updates();

		self.registry.drain_voxel_updates(VOXEL_UPDATE_BUDGET_SECONDS, &self.clock);
		self.registry.poll_physics(
			&self.collaborator,
			PHYSICS_POLL_BUDGET_SECONDS,
			&self.clock,
			self.camera.pose().position,
		);

		let search_started = self.clock.now();
		self.frustum_search.run(
			self.registry.grid(),
			&self.camera,
			self.registry.voxel_size(),
			self.dynamic_distance.render_distance(),
			GRACE_WINDOW_SECONDS,
			GRACE_WINDOW_JITTER_FRACTION,
			self.config.search_time_budget(),
			&self.clock,
		);
		let search_duration = self.clock.now() - search_started;

		// Each frame's ingest produces a fresh set of visible candidates;
		// anything staged but never folded into the heap by a prior
		// frame's iterate_objects_to_update (e.g. a caller that only
		// calls get_visible_objects) is stale and must not linger.
		self.visible_queue.clear_incoming_batch();

		let ingest_started = self.clock.now();
		let outcome = run_ingest(
			&mut self.registry,
			self.frustum_search.visible_keys(),
			&mut self.visible_now,
			&mut self.visible_queue,
			self.camera.pose().position,
			self.camera.fov_degrees(),
			self.dynamic_distance.render_distance(),
			self.config.best_refresh_rate(),
			self.config.worst_refresh_rate(),
			now,
			self.config.ingest_time_budget(),
			&self.clock,
		);
		let ingest_duration = self.clock.now() - ingest_started;

		for handle in &outcome.entered_view {
			if let (Some(cb), Some(record)) = (&mut self.on_object_entered_view, self.registry.get(*handle)) {
				cb(&record.object);
			}
		}

		let exited: Vec<ObjectHandle> = self
			.visible_now
			.iter()
			.filter(|&(_, &t)| t != now)
			.map(|(&h, _)| h)
			.collect();
		for handle in exited {
			self.visible_now.remove(&handle);
			if let (Some(cb), Some(record)) = (&mut self.on_object_exited_view, self.registry.get(handle)) {
				cb(&record.object);
			}
		}

		self.metrics.record_frame(
			self.frustum_search.skipped_search(),
			outcome.skipped_ingest,
			search_duration,
			ingest_duration,
		);

		if self.config.dynamic_render_distance() {
			self.dynamic_distance.update(
				&self.metrics,
				self.config.render_distance_target(),
				self.config.search_time_budget(),
				self.config.ingest_time_budget(),
				self.config.best_refresh_rate(),
				self.config.refresh_rate_midpoint(),
			);
		}

		if now - self.last_scratch_shrink >= SCRATCH_SHRINK_INTERVAL_SECONDS {
			self.registry.shrink_to_fit();
			self.visible_queue.shrink_to_fit();
			self.last_scratch_shrink = now;
		}

		self.ran_this_frame = true;
	}

	/// Runs the scheduler if it hasn't already run this frame, then
	/// returns a snapshot clone of the current visible candidates.
	pub fn get_visible_objects(&mut self) -> Vec<ObjectHandle> {
		self.ensure_ran();
		self.visible_queue
			.incoming_batch_snapshot()
			.into_iter()
			.map(|(handle, _)| handle)
			.collect()
	}

	/// Streams `(object, objectDeltaTime, distance)` to `visit` under
	/// the configured update-time budget, p0-tier objects (priority
	/// below [`P0_THRESHOLD`]) getting a 1.15x allowance - or an
	/// unbounded one when `strictlyEnforceWorstRefreshRate` is set.
	/// Returns a borrowed callback rather than an `Iterator` because
	/// each yielded `&Obj` borrows the registry this call mutates.
	pub fn iterate_objects_to_update(&mut self, mut visit: impl FnMut(&Obj, f64, f32)) {
		self.ensure_ran();
		if !self.batch_enqueued_this_frame {
			self.visible_queue.enqueue_incoming_batch();
			self.batch_enqueued_this_frame = true;
			self.iter_started = self.clock.now();
		}
		let iter_started = self.iter_started;
		let update_budget = self.config.update_time_budget();
		let p0_budget = if self.config.strictly_enforce_worst_refresh_rate() {
			f64::INFINITY
		} else {
			update_budget * 1.15
		};

		loop {
			let Some(priority) = self.visible_queue.peek_priority() else {
				break;
			};
			let elapsed = self.clock.now() - iter_started;
			let deadline = if priority < P0_THRESHOLD { p0_budget } else { update_budget };
			if elapsed >= deadline {
				self.visible_queue.clear();
				break;
			}
			let (handle, priority) = self.visible_queue.dequeue();
			if priority >= PARKED_PRIORITY_FLOOR {
				// Visible but not due for an update yet: drop it from
				// this frame's pass without touching last_update_clock.
				continue;
			}
			let Some(record) = self.registry.get_mut(handle) else {
				warn!("update iterator dequeued a handle with no backing record, skipping");
				continue;
			};
			let dt = iter_started - record.last_update_clock;
			record.last_update_clock = iter_started;
			let distance = record.distance;
			self.metrics.sample_object_delta(dt);
			visit(&record.object, dt, distance);
		}
	}

	pub fn set_voxel_size(&mut self, size: f32) -> Result<(), SchedulerError> {
		self.config.set_voxel_size(size)?;
		self.registry.rebuild_with_voxel_size(size);
		Ok(())
	}

	pub fn set_render_distance_target(&mut self, distance: f32) -> Result<(), SchedulerError> {
		self.config.set_render_distance_target(distance)?;
		self.dynamic_distance = DynamicDistance::new(distance);
		Ok(())
	}

	pub fn set_time_budgets(&mut self, search: f64, ingest: f64, update: f64) -> Result<(), SchedulerError> {
		self.config.set_time_budgets(search, ingest, update)
	}

	pub fn set_refresh_rates(&mut self, best: f64, worst: f64) -> Result<(), SchedulerError> {
		self.config.set_refresh_rates(best, worst)
	}

	pub fn set_compute_visibility_only_on_demand(&mut self, enabled: bool) {
		self.config.set_compute_visibility_only_on_demand(enabled);
	}

	pub fn set_strictly_enforce_worst_refresh_rate(&mut self, enabled: bool) {
		self.config.set_strictly_enforce_worst_refresh_rate(enabled);
	}

	pub fn set_dynamic_render_distance(&mut self, enabled: bool) {
		self.config.set_dynamic_render_distance(enabled);
	}
}
