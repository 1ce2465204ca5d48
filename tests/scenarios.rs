use frustum_throttle::dimension::{Bounds, CameraSource, DimensionKind, DimensionUpdate, ObserverHandle, Pose, SceneCollaborator};
use frustum_throttle::{Config, ManualClock, Scheduler};
use glam::{Quat, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

/// A scene object the test suite controls directly: a fixed id plus an
/// externally-mutable pose, so tests can move an object and have the
/// scheduler pick the change up through the observer mechanism exactly
/// as a real scene graph would deliver it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TestObject(u64);

/// Cloning shares the same underlying maps (all fields are `Rc`), so a
/// test can hold a handle to move objects around after handing a clone
/// of the collaborator to the scheduler.
#[derive(Default, Clone)]
struct StubCollaborator {
	poses: Rc<RefCell<std::collections::HashMap<u64, Pose>>>,
	bounds: Rc<RefCell<std::collections::HashMap<u64, Bounds>>>,
	observers: Rc<RefCell<std::collections::HashMap<u64, Box<dyn FnMut(DimensionUpdate)>>>>,
}
impl StubCollaborator {
	fn new() -> Self {
		Self::default()
	}

	fn place(&self, object: TestObject, pose: Pose, bounds: Bounds) {
		self.poses.borrow_mut().insert(object.0, pose);
		self.bounds.borrow_mut().insert(object.0, bounds);
	}

	/// Moves a previously-placed object and fires its observer, exactly
	/// as an external scene graph would on the next transform update.
	fn move_object(&self, object: TestObject, pose: Pose) {
		self.poses.borrow_mut().insert(object.0, pose);
		let bounds = self.bounds.borrow()[&object.0];
		if let Some(observer) = self.observers.borrow_mut().get_mut(&object.0) {
			observer(DimensionUpdate { pose, bounds });
		}
	}
}
impl SceneCollaborator<TestObject> for StubCollaborator {
	fn resolve(&self, object: &TestObject) -> Option<(DimensionKind, DimensionUpdate)> {
		let pose = *self.poses.borrow().get(&object.0)?;
		let bounds = *self.bounds.borrow().get(&object.0)?;
		Some((DimensionKind::RigidBody, DimensionUpdate { pose, bounds }))
	}

	fn observe(&mut self, object: &TestObject, on_change: Box<dyn FnMut(DimensionUpdate)>) -> ObserverHandle {
		self.observers.borrow_mut().insert(object.0, on_change);
		ObserverHandle(object.0)
	}

	fn unobserve(&mut self, handle: ObserverHandle) {
		self.observers.borrow_mut().remove(&handle.0);
	}

	fn poll(&self, object: &TestObject) -> Option<DimensionUpdate> {
		let pose = *self.poses.borrow().get(&object.0)?;
		let bounds = *self.bounds.borrow().get(&object.0)?;
		Some(DimensionUpdate { pose, bounds })
	}
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

fn camera_at_origin_facing_neg_z(fov: f32) -> StubCamera {
	StubCamera {
		pose: Pose::new(Vec3::new(0.0, 0.0, 10.0), Quat::IDENTITY),
		fov,
		aspect: 1.0,
	}
}

fn small_bounds() -> Bounds {
	Bounds::new(Vec3::splat(0.1))
}

#[test]
fn single_static_object_at_origin_is_visible_and_yielded() {
	let mut config = Config::new();
	config.set_voxel_size(10.0).unwrap();
	config.set_render_distance_target(50.0).unwrap();

	let collaborator = StubCollaborator::new();
	collaborator.place(TestObject(1), Pose::new(Vec3::ZERO, Quat::IDENTITY), small_bounds());

	let camera = camera_at_origin_facing_neg_z(60.0);
	let clock = ManualClock::new(0.0);
	let mut scheduler = Scheduler::new(config, collaborator, camera, clock, 7);

	scheduler.add_object(TestObject(1)).unwrap();
	scheduler.begin_frame();

	let visible = scheduler.get_visible_objects();
	assert_eq!(visible.len(), 1);

	let mut yielded = Vec::new();
	scheduler.iterate_objects_to_update(|object, dt, distance| {
		yielded.push((*object, dt, distance));
	});
	assert_eq!(yielded.len(), 1);
	let (object, _dt, distance) = yielded[0];
	assert_eq!(object, TestObject(1));
	assert!((distance - 10.0).abs() < 0.5);
}

#[test]
fn object_exiting_frustum_fires_exited_view_exactly_once() {
	let mut config = Config::new();
	config.set_voxel_size(10.0).unwrap();
	config.set_render_distance_target(50.0).unwrap();

	let collaborator = StubCollaborator::new();
	collaborator.place(TestObject(1), Pose::new(Vec3::ZERO, Quat::IDENTITY), small_bounds());

	let camera = camera_at_origin_facing_neg_z(60.0);
	let clock = ManualClock::new(0.0);
	let mut scheduler = Scheduler::new(config, collaborator.clone(), camera, clock, 7);

	scheduler.add_object(TestObject(1)).unwrap();

	let exited = Rc::new(RefCell::new(Vec::new()));
	let exited_writer = Rc::clone(&exited);
	scheduler.on_object_exited_view(move |object: &TestObject| {
		exited_writer.borrow_mut().push(*object);
	});

	scheduler.begin_frame();
	assert_eq!(scheduler.get_visible_objects().len(), 1);

	collaborator.move_object(TestObject(1), Pose::new(Vec3::new(10_000.0, 0.0, 0.0), Quat::IDENTITY));
	scheduler.begin_frame();

	assert_eq!(exited.borrow().as_slice(), &[TestObject(1)]);
	assert!(!scheduler.get_visible_objects().contains(&TestObject(1)));
}

#[test]
fn near_camera_object_dequeues_before_a_large_far_object() {
	let mut config = Config::new();
	config.set_voxel_size(10.0).unwrap();
	config.set_render_distance_target(250.0).unwrap();

	let collaborator = StubCollaborator::new();
	collaborator.place(TestObject(1), Pose::new(Vec3::new(0.0, 0.0, 5.0), Quat::IDENTITY), Bounds::new(Vec3::splat(0.05)));
	collaborator.place(
		TestObject(2),
		Pose::new(Vec3::new(0.0, 0.0, -190.0), Quat::IDENTITY),
		Bounds::new(Vec3::splat(20.0)),
	);

	let camera = camera_at_origin_facing_neg_z(90.0);
	let clock = ManualClock::new(0.0);
	let mut scheduler = Scheduler::new(config, collaborator.clone(), camera, clock.clone(), 7);

	scheduler.add_object(TestObject(1)).unwrap();
	scheduler.add_object(TestObject(2)).unwrap();
	// Clear the just-added p0 overdue state so both objects land in the
	// nearby/weighted tiers instead, where screen size alone would have
	// put the (larger) far object first.
	clock.advance(0.3);
	scheduler.begin_frame();

	let mut order = Vec::new();
	scheduler.iterate_objects_to_update(|object, _dt, _distance| {
		order.push(*object);
	});

	assert_eq!(order.first(), Some(&TestObject(1)));
}

#[test]
fn zero_search_budget_starves_search_and_shrinks_render_distance() {
	let mut config = Config::new();
	config.set_voxel_size(10.0).unwrap();
	config.set_render_distance_target(150.0).unwrap();
	config.set_time_budgets(0.0, 0.0015, 0.002).unwrap();

	let collaborator = StubCollaborator::new();
	let mut rng = rand::thread_rng();
	use rand::Rng;
	for i in 0..50_000u64 {
		let x: f32 = rng.gen_range(-500.0..500.0);
		let y: f32 = rng.gen_range(-500.0..500.0);
		let z: f32 = rng.gen_range(-500.0..500.0);
		collaborator.place(TestObject(i), Pose::new(Vec3::new(x, y, z), Quat::IDENTITY), small_bounds());
	}

	let camera = camera_at_origin_facing_neg_z(60.0);
	let clock = ManualClock::new(0.0);
	let initial_render_distance = config.render_distance_target();
	let mut scheduler = Scheduler::new(config, collaborator.clone(), camera, clock, 7);

	for i in 0..50_000u64 {
		scheduler.add_object(TestObject(i)).unwrap();
	}
	scheduler.begin_frame();

	assert!(scheduler.metrics().avg_skipped_search() > 0.0);
	assert!(scheduler.render_distance() < initial_render_distance);
}

#[test]
fn large_object_straddling_a_voxel_boundary_spans_multiple_keys() {
	let mut config = Config::new();
	let voxel_size = 10.0;
	config.set_voxel_size(voxel_size).unwrap();
	config.set_render_distance_target(100.0).unwrap();

	let collaborator = StubCollaborator::new();
	// Centered exactly on a voxel boundary corner so the bounding
	// sphere of radius == voxelSize reaches into neighboring voxels.
	collaborator.place(
		TestObject(1),
		Pose::new(Vec3::new(0.0, 0.0, 5.0), Quat::IDENTITY),
		Bounds::new(Vec3::splat(voxel_size)),
	);

	let camera = camera_at_origin_facing_neg_z(90.0);
	let clock = ManualClock::new(0.0);
	let mut scheduler = Scheduler::new(config, collaborator, camera, clock, 7);

	let handle = scheduler.add_object(TestObject(1)).unwrap();
	scheduler.begin_frame();

	let visible = scheduler.get_visible_objects();
	assert!(visible.contains(&handle));
}

#[test]
fn best_refresh_rate_parks_an_object_just_yielded() {
	let mut config = Config::new();
	config.set_voxel_size(10.0).unwrap();
	config.set_render_distance_target(50.0).unwrap();
	config.set_refresh_rates(1.0 / 60.0, 1.0).unwrap();

	let collaborator = StubCollaborator::new();
	collaborator.place(TestObject(1), Pose::new(Vec3::ZERO, Quat::IDENTITY), small_bounds());

	let camera = camera_at_origin_facing_neg_z(60.0);
	let clock = ManualClock::new(0.0);
	let mut scheduler = Scheduler::new(config, collaborator.clone(), camera, clock.clone(), 7);

	scheduler.add_object(TestObject(1)).unwrap();
	scheduler.begin_frame();

	let mut first_pass = Vec::new();
	scheduler.iterate_objects_to_update(|object, _dt, _distance| first_pass.push(*object));
	assert_eq!(first_pass, vec![TestObject(1)]);

	clock.advance(0.005);
	scheduler.begin_frame();

	let mut second_pass = Vec::new();
	scheduler.iterate_objects_to_update(|object, _dt, _distance| second_pass.push(*object));
	assert!(second_pass.is_empty());
}
