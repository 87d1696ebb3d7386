use crate::btree::arena::{Body, PageId};
use crate::btree::{BTree, child_index};
use crate::error::Result;
use crate::types::{Key, Tuple};

/// Lazy ascending traversal of a [`BTree`] over `[from, to)`.
///
/// The iterator keeps the handles of the nodes above the current leaf.
/// Those pages are pinned: pages released by the retention queue are only
/// dropped once the iterator has moved past them. Each call to
/// [`BTree::range_iterator`] starts a fresh traversal.
pub struct RangeIterator<'a> {
    tree: &'a mut BTree,
    from: Option<Key>,
    to: Option<Key>,
    /// Ancestors of the current leaf with the index of the child taken.
    stack: Vec<(PageId, usize)>,
    leaf: Option<PageId>,
    pos: usize,
    done: bool,
}

impl<'a> RangeIterator<'a> {
    pub(crate) fn new(tree: &'a mut BTree, from: Option<Key>, to: Option<Key>) -> Self {
        let done = matches!((&from, &to), (Some(f), Some(t)) if f >= t);
        RangeIterator {
            tree,
            from,
            to,
            stack: Vec::new(),
            leaf: None,
            pos: 0,
            done,
        }
    }

    fn seek(&mut self) -> Result<PageId> {
        let mut id = self.tree.root_id();
        self.tree.touch_page(id)?;
        loop {
            let idx = match self.tree.body(id) {
                Body::Leaf { keys, .. } => {
                    self.pos = match &self.from {
                        Some(from) => keys.partition_point(|k| k < from),
                        None => 0,
                    };
                    return Ok(id);
                }
                Body::Node { keys, .. } => match &self.from {
                    Some(from) => child_index(keys, from),
                    None => 0,
                },
            };
            self.stack.push((id, idx));
            id = self.tree.fetch_child(id, idx, false)?;
        }
    }

    /// Moves to the first entry of the next leaf. Returns false at the end
    /// of the tree.
    fn advance(&mut self) -> Result<bool> {
        loop {
            let Some((node, idx)) = self.stack.last_mut() else {
                return Ok(false);
            };
            if *idx + 1 < self.tree.body(*node).fill() {
                *idx += 1;
                break;
            }
            self.stack.pop();
        }
        let Some(&(node, idx)) = self.stack.last() else {
            return Ok(false);
        };
        let mut id = self.tree.fetch_child(node, idx, false)?;
        while !self.tree.body(id).is_leaf() {
            self.stack.push((id, 0));
            id = self.tree.fetch_child(id, 0, false)?;
        }
        self.leaf = Some(id);
        self.pos = 0;

        let pinned: Vec<PageId> = self.stack.iter().map(|(id, _)| *id).chain(self.leaf).collect();
        self.tree.release(&pinned);
        Ok(true)
    }

    fn step(&mut self) -> Result<Option<Tuple>> {
        let mut leaf = match self.leaf {
            Some(leaf) => leaf,
            None => {
                let leaf = self.seek()?;
                self.leaf = Some(leaf);
                leaf
            }
        };
        loop {
            if let Body::Leaf { keys, values } = self.tree.body(leaf) {
                if let Some(key) = keys.get(self.pos) {
                    if self.to.as_ref().is_some_and(|to| key >= to) {
                        return Ok(None);
                    }
                    let tuple = (key.clone(), values[self.pos].clone());
                    self.pos += 1;
                    return Ok(Some(tuple));
                }
            }
            if !self.advance()? {
                return Ok(None);
            }
            leaf = match self.leaf {
                Some(leaf) => leaf,
                None => return Ok(None),
            };
        }
    }
}

impl Iterator for RangeIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for RangeIterator<'_> {
    fn drop(&mut self) {
        self.tree.release(&[]);
    }
}
