//! Per-frame visibility and update scheduling for large populations of
//! spatially-located objects viewed by a single camera.
//!
//! Each frame, [`Scheduler`] indexes registered objects into a sparse
//! [`voxel::VoxelGrid`], runs a time-budgeted [`frustum::FrustumSearch`]
//! to find which voxels are inside the camera's view frustum, scores
//! the objects inside those voxels with [`ingest`]'s priority function,
//! and exposes the result as an ordered stream of objects worth
//! updating this frame under a strict time budget. A
//! [`dynamic_distance::DynamicDistance`] controller widens or narrows
//! the render distance frame to frame to keep that budget met.
//!
//! Scene-graph traversal, asset loading, and the render API itself are
//! out of scope: this crate only talks to the outside world through
//! [`dimension::SceneCollaborator`], [`dimension::CameraSource`], and
//! [`clock::Clock`].

#[macro_use]
extern crate log;

pub mod clock;
pub mod config;
pub mod dimension;
pub mod dynamic_distance;
pub mod error;
pub mod frustum;
pub mod handle;
pub mod ingest;
pub mod metrics;
pub mod priority_queue;
pub mod registry;
pub mod scheduler;
pub mod voxel;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use dimension::{Bounds, CameraSource, DimensionKind, DimensionUpdate, ObserverHandle, Pose, SceneCollaborator};
pub use error::SchedulerError;
pub use handle::ObjectHandle;
pub use metrics::RollingMetrics;
pub use scheduler::Scheduler;
