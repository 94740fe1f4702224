//! Iteration over the index: plain in-order traversal and regex traversal
//! with partial-bit pruning.
//!
//! An iterator's descent state references tree nodes by id and slot, which
//! stays valid for its whole life: constructing an iterator registers it
//! with the index, and while any iterator is registered the index defers
//! every structural mutation (see the pending list in `lib.rs`). Versions
//! keep accumulating meanwhile, so emission filters chains by the
//! iterator's snapshot sequence and merges the pending list back in.

use crate::tree::{CritPtr, NodeId};
use crate::{resolve, zero_ext_cmp, Index, IndexError, IterGuard, Version};
use std::cmp::Ordering;
use std::sync::Arc;
use usr::{Usr, UsrJudge};

/// Plain in-order iterator; yields `(key, value)` pairs in the tree's
/// zero-extended byte order.
pub struct TreeIter {
    snapshot: u64,
    stack: Vec<(NodeId, usize)>,
    pending: Vec<(Vec<u8>, Vec<Version>)>,
    pending_pos: usize,
    peeked: Option<(Vec<u8>, u32)>,
    _guard: IterGuard,
}

impl TreeIter {
    /// Registers with `index` and positions before the first key.
    pub fn new(index: &Index, snapshot: u64) -> Self {
        Self {
            snapshot,
            stack: vec![(index.tree().root(), 0)],
            pending: index.pending_chains(),
            pending_pos: 0,
            peeked: None,
            _guard: index.iter_guard(),
        }
    }

    /// Repositions at the first key not less than `target`.
    pub fn seek(&mut self, index: &Index, target: &[u8]) {
        self.peeked = None;
        self.stack.clear();
        let tree = index.tree();
        let mut cursor = tree.root();
        loop {
            let node = tree.node(cursor);
            let (idx, direct, _) = tree.find_best_match(node, target);
            let slot = idx + usize::from(direct);
            match node.ptrs.get(slot) {
                Some(CritPtr::Node(child)) => {
                    self.stack.push((cursor, slot + 1));
                    cursor = *child;
                }
                Some(CritPtr::Leaf(leaf)) => {
                    let start = if zero_ext_cmp(&leaf.key, target) == Ordering::Less {
                        slot + 1
                    } else {
                        slot
                    };
                    self.stack.push((cursor, start));
                    break;
                }
                _ => {
                    self.stack.push((cursor, slot));
                    break;
                }
            }
        }
        self.pending_pos = self
            .pending
            .partition_point(|(k, _)| zero_ext_cmp(k, target) == Ordering::Less);
    }

    /// Advances and returns the next visible pair.
    pub fn next(&mut self, index: &Index) -> Result<Option<(Vec<u8>, Vec<u8>)>, IndexError> {
        loop {
            if self.peeked.is_none() {
                self.peeked = self.advance_tree(index);
            }
            let take_pending = match (&self.peeked, self.pending.get(self.pending_pos)) {
                (None, None) => return Ok(None),
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((tree_key, _)), Some((pend_key, _))) => {
                    zero_ext_cmp(pend_key, tree_key) == Ordering::Less
                }
            };
            let resolved = if take_pending {
                let (key, chain) = &self.pending[self.pending_pos];
                self.pending_pos += 1;
                resolve(chain, self.snapshot).map(|offset| (key.clone(), offset))
            } else {
                self.peeked.take()
            };
            if let Some((key, offset)) = resolved {
                // a delete record read back through the offset is absent
                if let Some(value) = index.value_at(offset, &key)? {
                    return Ok(Some((key, value)));
                }
            }
        }
    }

    /// Next tree leaf with a version visible at the snapshot.
    fn advance_tree(&mut self, index: &Index) -> Option<(Vec<u8>, u32)> {
        let tree = index.tree();
        while let Some(frame) = self.stack.last_mut() {
            let node = tree.node(frame.0);
            let slot = frame.1;
            if slot >= node.size() {
                self.stack.pop();
                continue;
            }
            frame.1 += 1;
            match &node.ptrs[slot] {
                CritPtr::Null => {}
                CritPtr::Leaf(leaf) => {
                    if let Some(offset) = resolve(&leaf.versions, self.snapshot) {
                        return Some((leaf.key.to_vec(), offset));
                    }
                }
                CritPtr::Node(child) => self.stack.push((*child, 0)),
            }
        }
        None
    }
}

struct RegexFrame {
    node: NodeId,
    lo: usize,
    hi: usize,
    usr: Usr,
}

/// Regex-driven iterator.
///
/// At every binary split inside a node the deciding bit is revealed into
/// the path's [`Usr`]; a side whose view the judge rules out is never
/// pushed, so whole subtrees are skipped on partial information. Leaves
/// must pass the judge's exact match.
pub struct RegexIter {
    snapshot: u64,
    judge: Arc<dyn UsrJudge + Send + Sync>,
    stack: Vec<RegexFrame>,
    pending: Vec<(Vec<u8>, Vec<Version>)>,
    pending_pos: usize,
    peeked: Option<(Vec<u8>, u32)>,
    reversed: bool,
    _guard: IterGuard,
}

impl RegexIter {
    pub fn new(
        index: &Index,
        judge: Arc<dyn UsrJudge + Send + Sync>,
        snapshot: u64,
        reversed: bool,
    ) -> Self {
        let tree = index.tree();
        let root = tree.root();
        let size = tree.node(root).size();
        let mut stack = Vec::new();
        if size > 0 {
            stack.push(RegexFrame {
                node: root,
                lo: 0,
                hi: size,
                usr: Usr::new(),
            });
        }
        let mut pending = index.pending_chains();
        if reversed {
            pending.reverse();
        }
        Self {
            snapshot,
            judge,
            stack,
            pending,
            pending_pos: 0,
            peeked: None,
            reversed,
            _guard: index.iter_guard(),
        }
    }

    pub fn next(&mut self, index: &Index) -> Result<Option<(Vec<u8>, Vec<u8>)>, IndexError> {
        loop {
            if self.peeked.is_none() {
                self.peeked = self.advance_tree(index);
            }
            let take_pending = match (&self.peeked, self.pending.get(self.pending_pos)) {
                (None, None) => return Ok(None),
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((tree_key, _)), Some((pend_key, _))) => {
                    let ord = zero_ext_cmp(pend_key, tree_key);
                    if self.reversed {
                        ord == Ordering::Greater
                    } else {
                        ord == Ordering::Less
                    }
                }
            };
            let resolved = if take_pending {
                let (key, chain) = &self.pending[self.pending_pos];
                self.pending_pos += 1;
                if self.judge.matches(&Usr::from_key(key)) {
                    resolve(chain, self.snapshot).map(|offset| (key.clone(), offset))
                } else {
                    None
                }
            } else {
                self.peeked.take()
            };
            if let Some((key, offset)) = resolved {
                if let Some(value) = index.value_at(offset, &key)? {
                    return Ok(Some((key, value)));
                }
            }
        }
    }

    fn advance_tree(&mut self, index: &Index) -> Option<(Vec<u8>, u32)> {
        let tree = index.tree();
        while let Some(RegexFrame { node, lo, hi, usr }) = self.stack.pop() {
            let nd = tree.node(node);
            if hi - lo == 1 {
                match &nd.ptrs[lo] {
                    CritPtr::Null => {}
                    CritPtr::Leaf(leaf) => {
                        if self.judge.matches(&Usr::from_key(&leaf.key)) {
                            if let Some(offset) = resolve(&leaf.versions, self.snapshot) {
                                return Some((leaf.key.to_vec(), offset));
                            }
                        }
                    }
                    CritPtr::Node(child) => {
                        let size = tree.node(*child).size();
                        if size > 0 {
                            self.stack.push(RegexFrame {
                                node: *child,
                                lo: 0,
                                hi: size,
                                usr,
                            });
                        }
                    }
                }
                continue;
            }

            // split the pointer range at the minimal routing entry and
            // reveal the deciding bit on each side
            let m = nd.min_entry(lo, hi - 1);
            let (diff, mask) = (nd.diffs[m], nd.masks[m]);
            let mut left = usr.clone();
            left.reveal(diff as usize, mask, false);
            let mut right = usr;
            right.reveal(diff as usize, mask, true);

            let left_frame = self.judge.possible(&left).then(|| RegexFrame {
                node,
                lo,
                hi: m + 1,
                usr: left,
            });
            let right_frame = self.judge.possible(&right).then(|| RegexFrame {
                node,
                lo: m + 1,
                hi,
                usr: right,
            });

            // the side to visit first goes on top of the stack
            let (first, second) = if self.reversed {
                (right_frame, left_frame)
            } else {
                (left_frame, right_frame)
            };
            if let Some(frame) = second {
                self.stack.push(frame);
            }
            if let Some(frame) = first {
                self.stack.push(frame);
            }
        }
        None
    }
}
