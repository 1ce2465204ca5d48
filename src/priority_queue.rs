use rustc_hash::FxHashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy)]
struct Entry<T> {
	priority: f64,
	item: T,
}

/// Binary min-heap over `(priority, item)`, smaller priority meaning
/// higher urgency. Carries an `incoming batch` staging area so a hot
/// ingest loop can append candidates without paying a per-item sift-up,
/// then fold them into the heap with one `O(n)` build.
///
/// `T` must be a cheap, hashable, equatable handle - this is built for
/// [`crate::handle::ObjectHandle`], never for hashing a caller's scene
/// object directly (see the "PriorityQueue dedup" design note).
#[derive(Debug)]
pub struct PriorityQueue<T: Copy + Eq + Hash> {
	heap: Vec<Entry<T>>,
	indices: FxHashMap<T, usize>,
	incoming: Vec<Entry<T>>,
}
impl<T: Copy + Eq + Hash> Default for PriorityQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}
impl<T: Copy + Eq + Hash> PriorityQueue<T> {
	pub fn new() -> Self {
		Self {
			heap: Vec::new(),
			indices: FxHashMap::default(),
			incoming: Vec::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}
	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}
	pub fn contains(&self, item: T) -> bool {
		self.indices.contains_key(&item)
	}

	pub fn peek(&self) -> Option<T> {
		self.heap.first().map(|e| e.item)
	}
	pub fn peek_priority(&self) -> Option<f64> {
		self.heap.first().map(|e| e.priority)
	}

	/// Inserts `item` with priority `p`. No-op if `item` is already
	/// queued, matching the dedup contract (use [`Self::update`] to
	/// change an already-queued item's priority).
	pub fn enqueue(&mut self, item: T, priority: f64) {
		debug_assert!(!priority.is_nan(), "priority queue does not accept NaN");
		if self.indices.contains_key(&item) {
			return;
		}
		let idx = self.heap.len();
		self.heap.push(Entry { priority, item });
		self.indices.insert(item, idx);
		self.sift_up(idx);
	}

	/// Appends every `(item, priority)` pair and rebuilds the heap
	/// invariant in `O(n)` via sift-down from the last parent, rather
	/// than `O(n log n)` repeated `enqueue` calls. Pairs for items
	/// already present are skipped.
	pub fn batch_enqueue(&mut self, items: &[(T, f64)]) {
		for &(item, priority) in items {
			debug_assert!(!priority.is_nan(), "priority queue does not accept NaN");
			if self.indices.contains_key(&item) {
				continue;
			}
			let idx = self.heap.len();
			self.heap.push(Entry { priority, item });
			self.indices.insert(item, idx);
		}
		if self.heap.len() > 1 {
			for start in (0..=(self.heap.len() / 2).saturating_sub(1)).rev() {
				self.sift_down(start);
			}
		}
	}

	/// Stages a single candidate without touching the heap yet.
	pub fn add_to_incoming_batch(&mut self, item: T, priority: f64) {
		self.incoming.push(Entry { priority, item });
	}

	/// Stages every candidate in `items` without touching the heap yet.
	pub fn add_multiple_to_incoming_batch(&mut self, items: &[(T, f64)]) {
		self.incoming
			.extend(items.iter().map(|&(item, priority)| Entry { priority, item }));
	}

	/// Clears any staged candidates that have not yet been folded into
	/// the heap, discarding them.
	pub fn clear_incoming_batch(&mut self) {
		self.incoming.clear();
	}

	/// A snapshot of the staged-but-not-yet-heapified candidates, in
	/// staging order. Used to answer `GetVisibleObjects` mid-frame
	/// without disturbing the heap.
	pub fn incoming_batch_snapshot(&self) -> Vec<(T, f64)> {
		self.incoming.iter().map(|e| (e.item, e.priority)).collect()
	}

	/// Folds every staged candidate into the heap via [`Self::batch_enqueue`],
	/// then clears the staging area.
	pub fn enqueue_incoming_batch(&mut self) {
		if self.incoming.is_empty() {
			return;
		}
		let staged: Vec<(T, f64)> = self.incoming.drain(..).map(|e| (e.item, e.priority)).collect();
		self.batch_enqueue(&staged);
	}

	/// Removes and returns the item with the smallest priority.
	///
	/// # Panics
	/// Panics if the queue is empty - dequeuing nothing is a
	/// programming error in this design, not a recoverable condition.
	pub fn dequeue(&mut self) -> (T, f64) {
		assert!(!self.heap.is_empty(), "dequeue on empty PriorityQueue");
		let root = self.heap.swap_remove(0);
		self.indices.remove(&root.item);
		if !self.heap.is_empty() {
			self.indices.insert(self.heap[0].item, 0);
			self.sift_down(0);
		}
		(root.item, root.priority)
	}

	/// Removes `item` from the heap, if present. No-op otherwise - a
	/// caller removing an object that already dequeued or never queued
	/// should not need to check first.
	pub fn remove(&mut self, item: T) {
		let Some(&idx) = self.indices.get(&item) else {
			return;
		};
		let last = self.heap.len() - 1;
		self.heap.swap(idx, last);
		self.heap.pop();
		self.indices.remove(&item);
		if idx < self.heap.len() {
			self.indices.insert(self.heap[idx].item, idx);
			self.sift_down(idx);
			self.sift_up(idx);
		}
	}

	/// Changes the priority of an already-queued item, re-heapifying
	/// around it. No-op if `item` is not queued.
	pub fn update(&mut self, item: T, priority: f64) {
		let Some(&idx) = self.indices.get(&item) else {
			return;
		};
		self.heap[idx].priority = priority;
		self.sift_down(idx);
		self.sift_up(idx);
	}

	fn sift_up(&mut self, mut idx: usize) {
		while idx > 0 {
			let parent = (idx - 1) / 2;
			if self.heap[idx].priority < self.heap[parent].priority {
				self.heap.swap(idx, parent);
				self.indices.insert(self.heap[idx].item, idx);
				self.indices.insert(self.heap[parent].item, parent);
				idx = parent;
			} else {
				break;
			}
		}
	}

	fn sift_down(&mut self, mut idx: usize) {
		let len = self.heap.len();
		loop {
			let left = 2 * idx + 1;
			let right = 2 * idx + 2;
			let mut smallest = idx;
			if left < len && self.heap[left].priority < self.heap[smallest].priority {
				smallest = left;
			}
			if right < len && self.heap[right].priority < self.heap[smallest].priority {
				smallest = right;
			}
			if smallest == idx {
				break;
			}
			self.heap.swap(idx, smallest);
			self.indices.insert(self.heap[idx].item, idx);
			self.indices.insert(self.heap[smallest].item, smallest);
			idx = smallest;
		}
	}

	pub fn clear(&mut self) {
		self.heap.clear();
		self.indices.clear();
		self.incoming.clear();
	}

	pub fn shrink_to_fit(&mut self) {
		self.heap.shrink_to_fit();
		self.indices.shrink_to_fit();
		self.incoming.shrink_to_fit();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use slotmap::SlotMap;

	slotmap::new_key_type! { struct TestKey; }

	fn keys(n: usize) -> Vec<TestKey> {
		let mut sm: SlotMap<TestKey, ()> = SlotMap::with_key();
		(0..n).map(|_| sm.insert(())).collect()
	}

	#[test]
	fn dequeues_in_priority_order() {
		let ks = keys(4);
		let mut q = PriorityQueue::new();
		q.enqueue(ks[0], 5.0);
		q.enqueue(ks[1], 1.0);
		q.enqueue(ks[2], 3.0);
		q.enqueue(ks[3], 2.0);
		let mut out = Vec::new();
		while !q.is_empty() {
			out.push(q.dequeue().1);
		}
		assert_eq!(out, vec![1.0, 2.0, 3.0, 5.0]);
	}

	#[test]
	fn enqueue_is_noop_for_duplicate() {
		let ks = keys(1);
		let mut q = PriorityQueue::new();
		q.enqueue(ks[0], 5.0);
		q.enqueue(ks[0], 1.0);
		assert_eq!(q.len(), 1);
		assert_eq!(q.peek_priority(), Some(5.0));
	}

	#[test]
	fn batch_enqueue_builds_valid_heap() {
		let ks = keys(100);
		let mut q = PriorityQueue::new();
		let items: Vec<(TestKey, f64)> = ks.iter().enumerate().map(|(i, &k)| (k, (99 - i) as f64)).collect();
		q.batch_enqueue(&items);
		let mut last = f64::NEG_INFINITY;
		let mut count = 0;
		while !q.is_empty() {
			let (_, p) = q.dequeue();
			assert!(p >= last);
			last = p;
			count += 1;
		}
		assert_eq!(count, 100);
	}

	#[test]
	fn add_multiple_to_incoming_batch_stages_every_pair() {
		let ks = keys(3);
		let mut q = PriorityQueue::new();
		q.add_multiple_to_incoming_batch(&[(ks[0], 3.0), (ks[1], 1.0), (ks[2], 2.0)]);
		assert!(q.is_empty());
		q.enqueue_incoming_batch();
		assert_eq!(q.len(), 3);
		assert_eq!(q.dequeue().1, 1.0);
	}

	#[test]
	fn incoming_batch_defers_until_flushed() {
		let ks = keys(2);
		let mut q = PriorityQueue::new();
		q.add_to_incoming_batch(ks[0], 2.0);
		q.add_to_incoming_batch(ks[1], 1.0);
		assert!(q.is_empty());
		assert_eq!(q.incoming_batch_snapshot().len(), 2);
		q.enqueue_incoming_batch();
		assert_eq!(q.len(), 2);
		assert_eq!(q.dequeue().1, 1.0);
	}

	#[test]
	fn remove_preserves_heap_property() {
		let ks = keys(6);
		let mut q = PriorityQueue::new();
		for (i, &k) in ks.iter().enumerate() {
			q.enqueue(k, i as f64);
		}
		q.remove(ks[0]);
		q.remove(ks[3]);
		let mut last = f64::NEG_INFINITY;
		while !q.is_empty() {
			let (_, p) = q.dequeue();
			assert!(p >= last);
			last = p;
		}
	}

	#[test]
	fn update_reorders_item() {
		let ks = keys(3);
		let mut q = PriorityQueue::new();
		q.enqueue(ks[0], 1.0);
		q.enqueue(ks[1], 2.0);
		q.enqueue(ks[2], 3.0);
		q.update(ks[2], 0.0);
		assert_eq!(q.peek(), Some(ks[2]));
	}
}
