use std::collections::VecDeque;

use super::Tid;

/// Number of priority levels. Priority `NUM_PRIORITIES - 1` is the
/// strongest; new threads default to 0.
pub const NUM_PRIORITIES: u32 = 10;

/// The ready queues: one FIFO per priority level. A thread is on at most
/// one queue, the one matching its current priority.
pub struct Scheduler {
    ready: Vec<VecDeque<Tid>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: (0..NUM_PRIORITIES).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Queue a thread behind its priority peers.
    pub fn ready_to_run(&mut self, thread: Tid, priority: u32) {
        self.ready[priority as usize].push_back(thread);
    }

    /// Dequeue the head of the strongest non-empty queue.
    pub fn find_next_to_run(&mut self) -> Option<Tid> {
        self.ready
            .iter_mut()
            .rev()
            .find_map(|queue| queue.pop_front())
    }

    /// Move a ready thread between priority queues after a donation.
    pub fn requeue(&mut self, thread: Tid, old_priority: u32, new_priority: u32) {
        let queue = &mut self.ready[old_priority as usize];
        if let Some(pos) = queue.iter().position(|&t| t == thread) {
            queue.remove(pos);
            self.ready[new_priority as usize].push_back(thread);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ready.iter().all(|q| q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u32) -> Tid {
        Tid::from_raw(n).unwrap()
    }

    #[test]
    fn strongest_queue_wins() {
        let mut s = Scheduler::new();
        s.ready_to_run(tid(1), 0);
        s.ready_to_run(tid(2), 5);
        s.ready_to_run(tid(3), 5);
        s.ready_to_run(tid(4), 2);

        assert_eq!(s.find_next_to_run(), Some(tid(2)));
        assert_eq!(s.find_next_to_run(), Some(tid(3)));
        assert_eq!(s.find_next_to_run(), Some(tid(4)));
        assert_eq!(s.find_next_to_run(), Some(tid(1)));
        assert_eq!(s.find_next_to_run(), None);
    }

    #[test]
    fn requeue_moves_between_levels() {
        let mut s = Scheduler::new();
        s.ready_to_run(tid(1), 1);
        s.ready_to_run(tid(2), 9);
        s.requeue(tid(1), 1, 9);

        assert_eq!(s.find_next_to_run(), Some(tid(2)));
        assert_eq!(s.find_next_to_run(), Some(tid(1)));
        assert!(s.is_empty());
    }
}
