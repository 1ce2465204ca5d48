use slotmap::new_key_type;

new_key_type! {
	/// Stable identity for a registered object.
	///
	/// Generational, so a handle whose record was removed and whose slot
	/// was later reused for a different object will not alias the new
	/// object - every queue and voxel list can hold a stale handle
	/// without risk of silently pointing at the wrong thing.
	pub struct ObjectHandle;
}
