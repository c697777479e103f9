//! Singly-linked queues whose nodes live in a shared, index-addressed arena.
//!
//! A [NodeArena] owns the values and their `next` links, a [LinkedQueue] is just a head / tail
//!  pair of indices into the arena. Several disjoint queues can share one arena, and moving a
//!  node from one queue to another never touches the value itself. A node belongs to at most
//!  one queue at a time - the queue operations rely on this and do not check it.
//!
//! Freed slots are kept in a free list and reused by later inserts.

use std::fmt::{Debug, Display, Formatter};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct NodeIdx(u32);

impl Display for NodeIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl NodeIdx {
    fn slot(self) -> usize {
        self.0 as usize
    }
}

enum Slot<T> {
    Occupied { value: T, next: Option<NodeIdx> },
    Vacant { next_free: Option<NodeIdx> },
}

pub struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<NodeIdx>,
    len: usize,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        NodeArena {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }
}

impl<T> Debug for NodeArena<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeArena{{len: {}, capacity: {}}}", self.len, self.slots.len())
    }
}

impl<T> NodeArena<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// stores a value in a new, unlinked node
    pub fn insert(&mut self, value: T) -> NodeIdx {
        self.len += 1;

        if let Some(idx) = self.free_head {
            match self.slots[idx.slot()] {
                Slot::Vacant { next_free } => self.free_head = next_free,
                Slot::Occupied { .. } => unreachable!("free list points to an occupied slot"),
            }
            self.slots[idx.slot()] = Slot::Occupied { value, next: None };
            return idx;
        }

        let idx = NodeIdx(u32::try_from(self.slots.len())
            .expect("arena exceeds u32::MAX nodes"));
        self.slots.push(Slot::Occupied { value, next: None });
        idx
    }

    /// frees a node and returns its value. The node must not be linked into a queue anymore.
    pub fn remove(&mut self, idx: NodeIdx) -> T {
        let slot = std::mem::replace(&mut self.slots[idx.slot()], Slot::Vacant { next_free: self.free_head });
        match slot {
            Slot::Occupied { value, .. } => {
                self.free_head = Some(idx);
                self.len -= 1;
                value
            }
            Slot::Vacant { next_free } => {
                self.slots[idx.slot()] = Slot::Vacant { next_free };
                panic!("removing vacant node {}", idx);
            }
        }
    }

    pub fn get(&self, idx: NodeIdx) -> &T {
        match &self.slots[idx.slot()] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => panic!("accessing vacant node {}", idx),
        }
    }

    pub fn get_mut(&mut self, idx: NodeIdx) -> &mut T {
        match &mut self.slots[idx.slot()] {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => panic!("accessing vacant node {}", idx),
        }
    }

    /// indices of all occupied nodes, in slot order
    pub fn occupied(&self) -> Vec<NodeIdx> {
        self.slots.iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Occupied { .. }))
            .map(|(i, _)| NodeIdx(i as u32))
            .collect()
    }

    fn next(&self, idx: NodeIdx) -> Option<NodeIdx> {
        match &self.slots[idx.slot()] {
            Slot::Occupied { next, .. } => *next,
            Slot::Vacant { .. } => panic!("following link of vacant node {}", idx),
        }
    }

    fn set_next(&mut self, idx: NodeIdx, new_next: Option<NodeIdx>) {
        match &mut self.slots[idx.slot()] {
            Slot::Occupied { next, .. } => *next = new_next,
            Slot::Vacant { .. } => panic!("linking vacant node {}", idx),
        }
    }
}

/// A FIFO queue over nodes of a [NodeArena]. All operations take the arena as a parameter,
///  and all queues passed the same arena must have been built from it.
#[derive(Default, Debug, Eq, PartialEq)]
pub struct LinkedQueue {
    head: Option<NodeIdx>,
    tail: Option<NodeIdx>,
}

impl LinkedQueue {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn front(&self) -> Option<NodeIdx> {
        self.head
    }

    /// detaches the queue's nodes from `self`, leaving it empty
    pub fn take(&mut self) -> LinkedQueue {
        std::mem::take(self)
    }

    pub fn push_back<T>(&mut self, arena: &mut NodeArena<T>, idx: NodeIdx) {
        arena.set_next(idx, None);
        match self.tail {
            None => self.head = Some(idx),
            Some(tail) => arena.set_next(tail, Some(idx)),
        }
        self.tail = Some(idx);
    }

    pub fn push_front<T>(&mut self, arena: &mut NodeArena<T>, idx: NodeIdx) {
        arena.set_next(idx, self.head);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
    }

    pub fn pop_front<T>(&mut self, arena: &mut NodeArena<T>) -> Option<NodeIdx> {
        let head = self.head?;
        self.head = arena.next(head);
        if self.head.is_none() {
            self.tail = None;
        }
        arena.set_next(head, None);
        Some(head)
    }

    /// moves all nodes of `other` in front of this queue's nodes, keeping their order
    pub fn prepend<T>(&mut self, arena: &mut NodeArena<T>, mut other: LinkedQueue) {
        let (Some(other_head), Some(other_tail)) = (other.head.take(), other.tail.take()) else {
            return;
        };

        arena.set_next(other_tail, self.head);
        if self.tail.is_none() {
            self.tail = Some(other_tail);
        }
        self.head = Some(other_head);
    }

    /// Inserts a node before the first node whose key is greater than or equal to the new
    ///  node's key, or at the tail if there is none. Applied to a queue that is sorted by the
    ///  key, this keeps it sorted.
    pub fn insert_sorted_by_key<T, K: Ord>(&mut self, arena: &mut NodeArena<T>, idx: NodeIdx, key: impl Fn(&T) -> K) {
        let new_key = key(arena.get(idx));

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if key(arena.get(current)) >= new_key {
                break;
            }
            prev = Some(current);
            cursor = arena.next(current);
        }

        arena.set_next(idx, cursor);
        match prev {
            None => self.head = Some(idx),
            Some(prev) => arena.set_next(prev, Some(idx)),
        }
        if cursor.is_none() {
            self.tail = Some(idx);
        }
    }

    /// iterates over the queue's node indices from head to tail
    pub fn iter<'a, T>(&self, arena: &'a NodeArena<T>) -> impl Iterator<Item = NodeIdx> + 'a {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = arena.next(current);
            Some(current)
        })
    }

    pub fn len<T>(&self, arena: &NodeArena<T>) -> usize {
        self.iter(arena).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn queue_of(arena: &mut NodeArena<u32>, values: &[u32]) -> LinkedQueue {
        let mut queue = LinkedQueue::default();
        for &v in values {
            let idx = arena.insert(v);
            queue.push_back(arena, idx);
        }
        queue
    }

    fn values(arena: &NodeArena<u32>, queue: &LinkedQueue) -> Vec<u32> {
        queue.iter(arena)
            .map(|idx| *arena.get(idx))
            .collect()
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::single(vec![1])]
    #[case::several(vec![4, 1, 3])]
    fn test_push_pop_fifo(#[case] input: Vec<u32>) {
        let mut arena = NodeArena::default();
        let mut queue = queue_of(&mut arena, &input);
        assert_eq!(values(&arena, &queue), input);
        assert_eq!(queue.len(&arena), input.len());

        let mut popped = Vec::new();
        while let Some(idx) = queue.pop_front(&mut arena) {
            popped.push(arena.remove(idx));
        }
        assert_eq!(popped, input);
        assert!(queue.is_empty());
        assert_eq!(queue, LinkedQueue::default());
        assert!(arena.is_empty());
    }

    #[rstest]
    #[case::into_empty(vec![], 5, vec![5])]
    #[case::at_head(vec![2, 4, 6], 1, vec![1, 2, 4, 6])]
    #[case::in_middle(vec![2, 4, 6], 5, vec![2, 4, 5, 6])]
    #[case::at_tail(vec![2, 4, 6], 7, vec![2, 4, 6, 7])]
    #[case::before_equal(vec![2, 4, 6], 4, vec![2, 4, 4, 6])]
    fn test_insert_sorted(#[case] initial: Vec<u32>, #[case] new_value: u32, #[case] expected: Vec<u32>) {
        let mut arena = NodeArena::default();
        let mut queue = queue_of(&mut arena, &initial);

        let idx = arena.insert(new_value);
        queue.insert_sorted_by_key(&mut arena, idx, |v| *v);
        assert_eq!(values(&arena, &queue), expected);

        // the tail must still be correct for subsequent appends
        let idx = arena.insert(99);
        queue.push_back(&mut arena, idx);
        assert_eq!(values(&arena, &queue).last(), Some(&99));
    }

    #[rstest]
    #[case::both_empty(vec![], vec![], vec![])]
    #[case::into_empty(vec![], vec![1, 2], vec![1, 2])]
    #[case::empty_other(vec![3], vec![], vec![3])]
    #[case::both(vec![3, 4], vec![1, 2], vec![1, 2, 3, 4])]
    fn test_prepend(#[case] initial: Vec<u32>, #[case] other: Vec<u32>, #[case] expected: Vec<u32>) {
        let mut arena = NodeArena::default();
        let mut queue = queue_of(&mut arena, &initial);
        let other = queue_of(&mut arena, &other);

        queue.prepend(&mut arena, other);
        assert_eq!(values(&arena, &queue), expected);

        let idx = arena.insert(99);
        queue.push_back(&mut arena, idx);
        assert_eq!(values(&arena, &queue).last(), Some(&99));
    }

    #[rstest]
    fn test_push_front() {
        let mut arena = NodeArena::default();
        let mut queue = LinkedQueue::default();
        let a = arena.insert(1);
        queue.push_front(&mut arena, a);
        let b = arena.insert(2);
        queue.push_front(&mut arena, b);
        let c = arena.insert(3);
        queue.push_back(&mut arena, c);
        assert_eq!(values(&arena, &queue), vec![2, 1, 3]);
    }

    #[rstest]
    fn test_disjoint_queues_share_arena() {
        let mut arena = NodeArena::default();
        let mut a = queue_of(&mut arena, &[1, 2, 3]);
        let mut b = queue_of(&mut arena, &[10]);

        let moved = a.pop_front(&mut arena).unwrap();
        b.push_back(&mut arena, moved);

        assert_eq!(values(&arena, &a), vec![2, 3]);
        assert_eq!(values(&arena, &b), vec![10, 1]);
        assert_eq!(arena.len(), 4);
    }

    #[rstest]
    fn test_free_list_reuse() {
        let mut arena = NodeArena::default();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.remove(a), 1);
        assert_eq!(arena.remove(b), 2);

        // most recently freed slot first
        assert_eq!(arena.insert(3), b);
        assert_eq!(arena.insert(4), a);
        assert_eq!(arena.insert(5), NodeIdx(2));
        assert_eq!(arena.occupied(), vec![a, b, NodeIdx(2)]);
        assert_eq!(arena.len(), 3);
    }

    #[rstest]
    fn test_take() {
        let mut arena = NodeArena::default();
        let mut queue = queue_of(&mut arena, &[1, 2]);
        let taken = queue.take();
        assert!(queue.is_empty());
        assert_eq!(values(&arena, &taken), vec![1, 2]);
    }
}
