use std::sync::Mutex;

use crate::sync::lock;

/// Hands out module serial numbers, wrapping to `start` after `max`.
#[derive(Debug)]
pub struct SnGenerator {
    start: u64,
    max: u64,
    state: Mutex<SnState>,
}

#[derive(Debug)]
struct SnState {
    next: u64,
    cycle_count: u64,
}

impl SnGenerator {
    /// `max == 0` means no upper bound other than `u64::MAX`.
    pub fn new(start: u64, max: u64) -> Self {
        let max = if max == 0 { u64::MAX } else { max };
        Self {
            start,
            max,
            state: Mutex::new(SnState {
                next: start,
                cycle_count: 0,
            }),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// The serial the next [`get`](Self::get) will return.
    pub fn next(&self) -> u64 {
        lock(&self.state).next
    }

    /// How many times the generator wrapped around.
    pub fn cycle_count(&self) -> u64 {
        lock(&self.state).cycle_count
    }

    pub fn get(&self) -> u64 {
        let mut state = lock(&self.state);
        let serial = state.next;
        if serial >= self.max {
            state.next = self.start;
            state.cycle_count += 1;
        } else {
            state.next += 1;
        }
        serial
    }
}

impl Default for SnGenerator {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential() {
        let sn = SnGenerator::new(1, 0);
        assert_eq!(sn.max(), u64::MAX);
        assert_eq!(sn.get(), 1);
        assert_eq!(sn.get(), 2);
        assert_eq!(sn.next(), 3);
    }

    #[test]
    fn test_wraps_after_max() {
        let sn = SnGenerator::new(5, 6);
        let serials: Vec<_> = (0..5).map(|_| sn.get()).collect();
        assert_eq!(serials, [5, 6, 5, 6, 5]);
        assert_eq!(sn.cycle_count(), 2);
        assert_eq!(sn.start(), 5);
    }
}
