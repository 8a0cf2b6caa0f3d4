//! L2: LRU-K victim selection (SPEC_FULL.md §4.2).
//!
//! A frame with fewer than `k` recorded accesses has a backward k-distance of
//! +infinity; among such frames classical LRU (oldest first access) applies. Once a
//! frame has accumulated `k` accesses, its backward k-distance is the timestamp of
//! its k-th most recent access — smaller means "victim first". Two FIFO-ish
//! structures materialise this split: `history_list` for +inf frames (ordered by
//! first access) and `cache_list` for frames with a real distance (ordered by
//! insertion only; `evict` scans it for the minimum).

use std::collections::{HashMap, VecDeque};

use crate::error::ReplacerError;

pub type FrameId = usize;

#[derive(Debug)]
struct LruKNode {
    /// Most recent accesses, capped at `k`, oldest first.
    history: VecDeque<usize>,
    k: usize,
    evictable: bool,
}

impl LruKNode {
    fn new(first_access: usize, k: usize) -> Self {
        let mut history = VecDeque::with_capacity(k);
        history.push_back(first_access);
        Self {
            history,
            k,
            evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > self.k {
            self.history.pop_front();
        }
    }

    /// `Some(ts)` once `k` accesses have been recorded (`ts` is the k-th most
    /// recent one); `None` while the frame still has +inf backward distance.
    fn backward_k_distance(&self) -> Option<usize> {
        if self.history.len() >= self.k {
            self.history.front().copied()
        } else {
            None
        }
    }
}

/// Picks an eviction victim among frames marked evictable.
#[derive(Debug)]
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    current_timestamp: usize,
    curr_size: usize,
    nodes: HashMap<FrameId, LruKNode>,
    history_list: VecDeque<FrameId>,
    cache_list: VecDeque<FrameId>,
}

impl LruKReplacer {
    pub fn new(replacer_size: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            k,
            replacer_size,
            current_timestamp: 0,
            curr_size: 0,
            nodes: HashMap::with_capacity(replacer_size),
            history_list: VecDeque::new(),
            cache_list: VecDeque::new(),
        }
    }

    fn check_frame(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        if frame_id >= self.replacer_size {
            Err(ReplacerError::InvalidFrame(frame_id))
        } else {
            Ok(())
        }
    }

    /// Record that `frame_id` was accessed at the current (incremented) timestamp.
    pub fn record_access(&mut self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.check_frame(frame_id)?;
        self.current_timestamp += 1;
        let ts = self.current_timestamp;

        match self.nodes.get_mut(&frame_id) {
            None => {
                self.nodes.insert(frame_id, LruKNode::new(ts, self.k));
            }
            Some(node) => {
                let had_distance = node.backward_k_distance().is_some();
                if !node.evictable {
                    node.record_access(ts);
                } else if had_distance {
                    // already in cache_list, stays there regardless of new timestamp
                    node.record_access(ts);
                } else {
                    node.record_access(ts);
                    if node.backward_k_distance().is_some() {
                        if let Some(pos) = self.history_list.iter().position(|f| *f == frame_id) {
                            self.history_list.remove(pos);
                        }
                        self.cache_list.push_back(frame_id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Toggle whether `frame_id` is a candidate for eviction.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<(), ReplacerError> {
        self.check_frame(frame_id)?;
        let Some(node) = self.nodes.get_mut(&frame_id) else {
            return Ok(());
        };
        if node.evictable == evictable {
            return Ok(());
        }
        node.evictable = evictable;
        let has_distance = node.backward_k_distance().is_some();
        if evictable {
            self.curr_size += 1;
            if has_distance {
                self.cache_list.push_back(frame_id);
            } else {
                self.history_list.push_back(frame_id);
            }
        } else {
            self.curr_size -= 1;
            let list = if has_distance {
                &mut self.cache_list
            } else {
                &mut self.history_list
            };
            if let Some(pos) = list.iter().position(|f| *f == frame_id) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    /// Evict the frame with the largest backward k-distance, clearing its history.
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.curr_size == 0 {
            return None;
        }
        if let Some(frame_id) = self.history_list.pop_front() {
            self.nodes.remove(&frame_id);
            self.curr_size -= 1;
            return Some(frame_id);
        }

        let mut best_idx = 0;
        let mut best_distance = usize::MAX;
        for (idx, frame_id) in self.cache_list.iter().enumerate() {
            let distance = self.nodes[frame_id]
                .backward_k_distance()
                .expect("cache_list entries always have a finite distance");
            if distance < best_distance {
                best_distance = distance;
                best_idx = idx;
            }
        }
        let frame_id = self.cache_list.remove(best_idx).unwrap();
        self.nodes.remove(&frame_id);
        self.curr_size -= 1;
        Some(frame_id)
    }

    /// Forcibly drop `frame_id` from the policy. No-op if unknown.
    pub fn remove(&mut self, frame_id: FrameId) -> Result<(), ReplacerError> {
        self.check_frame(frame_id)?;
        let Some(node) = self.nodes.get(&frame_id) else {
            return Ok(());
        };
        if !node.evictable {
            return Err(ReplacerError::NonEvictableFrame(frame_id));
        }
        let has_distance = node.backward_k_distance().is_some();
        let list = if has_distance {
            &mut self.cache_list
        } else {
            &mut self.history_list
        };
        if let Some(pos) = list.iter().position(|f| *f == frame_id) {
            list.remove(pos);
        }
        self.nodes.remove(&frame_id);
        self.curr_size -= 1;
        Ok(())
    }

    /// Number of evictable known frames.
    pub fn size(&self) -> usize {
        self.curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_backward_k_distance_prefers_no_second_access() {
        let mut r = LruKReplacer::new(3, 2);
        r.record_access(0).unwrap();
        r.record_access(1).unwrap();
        r.record_access(2).unwrap();
        r.record_access(0).unwrap();
        r.record_access(1).unwrap();
        r.set_evictable(0, true).unwrap();
        r.set_evictable(1, true).unwrap();
        r.set_evictable(2, true).unwrap();

        assert_eq!(r.evict(), Some(2));
    }

    #[test]
    fn size_tracks_evictable_count() {
        let mut r = LruKReplacer::new(4, 2);
        for i in 0..4 {
            r.record_access(i).unwrap();
        }
        assert_eq!(r.size(), 0);
        r.set_evictable(0, true).unwrap();
        r.set_evictable(1, true).unwrap();
        assert_eq!(r.size(), 2);
        r.set_evictable(0, false).unwrap();
        assert_eq!(r.size(), 1);
    }

    #[test]
    fn remove_on_non_evictable_fails_without_mutating() {
        let mut r = LruKReplacer::new(2, 2);
        r.record_access(0).unwrap();
        assert_eq!(r.remove(0), Err(ReplacerError::NonEvictableFrame(0)));
        assert_eq!(r.size(), 0);
        // still present and still trackable
        r.set_evictable(0, true).unwrap();
        assert_eq!(r.size(), 1);
    }

    #[test]
    fn remove_unknown_frame_is_silent() {
        let mut r = LruKReplacer::new(2, 2);
        assert_eq!(r.remove(1), Ok(()));
    }

    #[test]
    fn invalid_frame_id_is_an_error() {
        let mut r = LruKReplacer::new(2, 2);
        assert_eq!(
            r.record_access(5),
            Err(ReplacerError::InvalidFrame(5))
        );
        assert_eq!(r.set_evictable(5, true), Err(ReplacerError::InvalidFrame(5)));
    }

    #[test]
    fn classical_lru_among_infinite_distance_frames() {
        let mut r = LruKReplacer::new(3, 2);
        r.record_access(0).unwrap();
        r.record_access(1).unwrap();
        r.record_access(2).unwrap();
        r.set_evictable(0, true).unwrap();
        r.set_evictable(1, true).unwrap();
        r.set_evictable(2, true).unwrap();
        // none have reached k=2 accesses yet, so oldest-first-access wins
        assert_eq!(r.evict(), Some(0));
        assert_eq!(r.evict(), Some(1));
        assert_eq!(r.evict(), Some(2));
        assert_eq!(r.evict(), None);
    }

    #[test]
    fn cache_list_picks_smallest_kth_most_recent_timestamp() {
        let mut r = LruKReplacer::new(2, 2);
        r.record_access(0).unwrap();
        r.record_access(0).unwrap(); // frame 0: k-distance timestamp = 1
        r.record_access(1).unwrap();
        r.record_access(1).unwrap(); // frame 1: k-distance timestamp = 3
        r.set_evictable(0, true).unwrap();
        r.set_evictable(1, true).unwrap();
        assert_eq!(r.evict(), Some(0));
    }
}
