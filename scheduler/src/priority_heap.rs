//! C1: a bounded min-heap over pending requests, keyed by a mutable
//! numeric priority.
//!
//! A textbook binary heap assumes keys are immutable once inserted; this
//! one does not. The scheduler mutates `Request::priority` in place for
//! every pending request once per frame, then calls [`PriorityHeap::resort`]
//! rather than attempting incremental `decrease_key` operations. Between
//! resorts, `insert`/`pop` maintain correctness via linear min/max scans —
//! acceptable because `priority_heap_length` is small by configuration
//! (default 20), so an O(n) scan costs nothing next to the O(n log n)
//! per-frame resort.

use crate::request::Request;

/// A bounded min-heap of [`Request`]s ordered by `priority` (lower pops
/// first).
#[derive(Debug, Default)]
pub struct PriorityHeap {
	items: Vec<Request>,
	capacity: usize,
}

fn priority_cmp(a: &Request, b: &Request) -> std::cmp::Ordering {
	a.priority.partial_cmp(&b.priority).unwrap_or(std::cmp::Ordering::Equal)
}

impl PriorityHeap {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		PriorityHeap {
			items: Vec::new(),
			capacity,
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.items.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	#[must_use]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// `true` iff inserting `desired` more items would not require an
	/// eviction.
	#[must_use]
	pub fn has_open_slots(&self, desired: usize) -> bool {
		self.items.len() + desired <= self.capacity
	}

	/// Inserts `req`. If the heap is already at capacity, evicts and
	/// returns the maximum-priority (least important) element — which may
	/// be `req` itself, if it is not smaller than the current maximum.
	pub fn insert(&mut self, req: Request) -> Option<Request> {
		if self.items.len() < self.capacity {
			self.items.push(req);
			return None;
		}
		let Some(max_idx) = self.max_index() else {
			// capacity == 0: nothing to hold req against, it is rejected outright.
			return Some(req);
		};
		if priority_cmp(&req, &self.items[max_idx]) == std::cmp::Ordering::Less {
			Some(std::mem::replace(&mut self.items[max_idx], req))
		} else {
			Some(req)
		}
	}

	/// Removes and returns the minimum-priority (most important) element.
	pub fn pop(&mut self) -> Option<Request> {
		let min_idx = self.min_index()?;
		Some(self.items.swap_remove(min_idx))
	}

	/// Re-heapifies in O(n log n) after in-place priority mutation of many
	/// elements. Must be called once per frame before `pop()`ping admissions.
	pub fn resort(&mut self) {
		self.items.sort_by(priority_cmp);
	}

	/// Drains and returns every pending request, in no particular order.
	pub fn clear(&mut self) -> Vec<Request> {
		std::mem::take(&mut self.items)
	}

	/// Shrinks (or grows) the bound. Growing is free. Shrinking below the
	/// current length eagerly pops the highest-priority (lowest-numeric)
	/// items down to the new bound — the caller is expected to cancel them,
	/// trusting upstream to re-issue, per the spec's explicit design choice.
	pub fn set_capacity(&mut self, new_capacity: usize) -> Vec<Request> {
		self.capacity = new_capacity;
		let mut evicted = Vec::new();
		while self.items.len() > self.capacity {
			match self.pop() {
				Some(req) => evicted.push(req),
				None => break,
			}
		}
		evicted
	}

	/// Mutable access to every pending request, for the scheduler's
	/// per-frame `priority_fn` refresh pass.
	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Request> {
		self.items.iter_mut()
	}

	fn min_index(&self) -> Option<usize> {
		self.items.iter().enumerate().min_by(|(_, a), (_, b)| priority_cmp(a, b)).map(|(i, _)| i)
	}

	fn max_index(&self) -> Option<usize> {
		self.items.iter().enumerate().max_by(|(_, a), (_, b)| priority_cmp(a, b)).map(|(i, _)| i)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::request::Request;
	use std::sync::Arc;

	fn req(priority: f64) -> Request {
		let (r, _handle) = Request::new("https://example.com/x", Arc::new(|| Box::pin(async { Ok(crate::payload::Payload::new_empty()) })));
		r.with_priority(priority)
	}

	#[test]
	fn insert_below_capacity_never_evicts() {
		let mut heap = PriorityHeap::new(2);
		assert!(heap.insert(req(1.0)).is_none());
		assert!(heap.insert(req(2.0)).is_none());
		assert_eq!(heap.len(), 2);
	}

	#[test]
	fn insert_at_capacity_evicts_old_max_for_new_minimum() {
		let mut heap = PriorityHeap::new(2);
		heap.insert(req(1.0));
		heap.insert(req(2.0));
		let evicted = heap.insert(req(0.5)).expect("should evict");
		assert_eq!(evicted.priority, 2.0);
		assert_eq!(heap.len(), 2);
	}

	#[test]
	fn insert_at_capacity_rejects_new_value_larger_than_max() {
		let mut heap = PriorityHeap::new(2);
		heap.insert(req(1.0));
		heap.insert(req(2.0));
		let evicted = heap.insert(req(5.0)).expect("should evict");
		assert_eq!(evicted.priority, 5.0);
	}

	#[test]
	fn pop_returns_minimum() {
		let mut heap = PriorityHeap::new(3);
		heap.insert(req(3.0));
		heap.insert(req(1.0));
		heap.insert(req(2.0));
		assert_eq!(heap.pop().unwrap().priority, 1.0);
		assert_eq!(heap.pop().unwrap().priority, 2.0);
		assert_eq!(heap.pop().unwrap().priority, 3.0);
		assert!(heap.pop().is_none());
	}

	#[test]
	fn shrink_capacity_evicts_exactly_the_overflow_count() {
		let mut heap = PriorityHeap::new(5);
		for p in [5.0, 4.0, 3.0, 2.0, 1.0] {
			heap.insert(req(p));
		}
		let evicted = heap.set_capacity(2);
		assert_eq!(evicted.len(), 3);
		assert_eq!(heap.len(), 2);
		// the lowest-numeric (highest-priority) items were the ones popped/cancelled
		let mut evicted_priorities: Vec<f64> = evicted.iter().map(|r| r.priority).collect();
		evicted_priorities.sort_by(|a, b| a.partial_cmp(b).unwrap());
		assert_eq!(evicted_priorities, vec![1.0, 2.0, 3.0]);
	}

	#[test]
	fn grow_capacity_evicts_nothing() {
		let mut heap = PriorityHeap::new(1);
		heap.insert(req(1.0));
		let evicted = heap.set_capacity(10);
		assert!(evicted.is_empty());
		assert_eq!(heap.capacity(), 10);
	}

	#[test]
	fn resort_then_pop_is_ascending() {
		let mut heap = PriorityHeap::new(4);
		heap.insert(req(4.0));
		heap.insert(req(1.0));
		heap.insert(req(3.0));
		for (idx, item) in heap.iter_mut().enumerate() {
			item.priority = match idx {
				0 => 10.0,
				_ => item.priority,
			};
		}
		heap.resort();
		let mut popped = Vec::new();
		while let Some(r) = heap.pop() {
			popped.push(r.priority);
		}
		let mut sorted = popped.clone();
		sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
		assert_eq!(popped, sorted);
	}
}
