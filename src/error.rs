use thiserror::Error;

/// Errors surfaced across the public API.
///
/// Internal bookkeeping failures (a stale handle turning up in a voxel or
/// queue) are not part of this enum - those are logged once at `warn` and
/// skipped, per the "MissingObjectRecord" design note.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
	/// The scene collaborator could not resolve a pose or bounding box for
	/// an object passed to [`AddObject`](crate::Scheduler::add_object).
	#[error("object has no resolvable pose or bounds, cannot be added")]
	NotAddable,

	/// A configuration setter was given a value outside its valid range.
	/// The previous value is retained.
	#[error("invalid configuration value for {field}: {reason}")]
	InvalidConfigValue {
		field: &'static str,
		reason: &'static str,
	},
}
