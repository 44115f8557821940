use std::{
	cmp::Ordering,
	collections::BinaryHeap,
	fmt::{self, Debug, Formatter},
};

/// Max-heap over a caller-supplied comparator. Items that compare equal pop in insertion order.
pub struct PriorityQueue<T> {
	heap: BinaryHeap<Entry<T>>,
	cmp: fn(&T, &T) -> Ordering,
	next_seq: u64,
}
impl<T> PriorityQueue<T> {
	/// `cmp(a, b) == Greater` means `a` leaves the queue before `b`.
	pub fn new(cmp: fn(&T, &T) -> Ordering) -> Self {
		Self { heap: BinaryHeap::new(), cmp, next_seq: 0 }
	}

	pub fn push(&mut self, item: T) {
		let seq = self.next_seq;

		self.next_seq += 1;
		self.heap.push(Entry { item, seq, cmp: self.cmp });
	}

	pub fn pop(&mut self) -> Option<T> {
		self.heap.pop().map(|entry| entry.item)
	}

	pub fn peek(&self) -> Option<&T> {
		self.heap.peek().map(|entry| &entry.item)
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}

	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}

	pub fn contains(&self, pred: impl Fn(&T) -> bool) -> bool {
		self.heap.iter().any(|entry| pred(&entry.item))
	}

	/// Keeps items matching `keep` and returns the removed ones. Survivors keep their
	/// insertion order for ties.
	pub fn retain(&mut self, keep: impl Fn(&T) -> bool) -> Vec<T> {
		let mut removed = Vec::new();
		let mut kept = Vec::with_capacity(self.heap.len());

		for entry in self.heap.drain() {
			if keep(&entry.item) {
				kept.push(entry);
			} else {
				removed.push(entry.item);
			}
		}

		self.heap.extend(kept);

		removed
	}
}
impl<T> Debug for PriorityQueue<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("PriorityQueue").field("len", &self.heap.len()).finish()
	}
}

struct Entry<T> {
	item: T,
	seq: u64,
	cmp: fn(&T, &T) -> Ordering,
}
impl<T> PartialEq for Entry<T> {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl<T> Ord for Entry<T> {
	fn cmp(&self, other: &Self) -> Ordering {
		// Lower sequence numbers rank higher so ties drain first-in first-out.
		(self.cmp)(&self.item, &other.item).then_with(|| other.seq.cmp(&self.seq))
	}
}
