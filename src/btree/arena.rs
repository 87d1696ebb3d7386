use std::ops::{Index, IndexMut};

use crate::btree::page::PageData;
use crate::error::{Error, Result};
use crate::rawstore::Address;
use crate::types::{Key, Value};

/// Handle naming a resident page. Handles are compared by identity: two
/// resident copies of the same persistent page have different handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u32);

impl PageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One child slot of a resident node.
///
/// `addr` is set while the child is persistent; `page` while it is
/// resident. A dirty child is always resident and has no address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Child {
    pub addr: Option<Address>,
    pub page: Option<PageId>,
}

impl Child {
    pub fn stored(addr: Address) -> Self {
        Child {
            addr: Some(addr),
            page: None,
        }
    }

    pub fn dirty(page: PageId) -> Self {
        Child {
            addr: None,
            page: Some(page),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Leaf { keys: Vec<Key>, values: Vec<Value> },
    Node { keys: Vec<Key>, children: Vec<Child> },
}

impl Body {
    pub fn empty_leaf() -> Self {
        Body::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Body::Leaf { .. })
    }

    /// Keys in a leaf, children in a node.
    pub fn fill(&self) -> usize {
        match self {
            Body::Leaf { keys, .. } => keys.len(),
            Body::Node { children, .. } => children.len(),
        }
    }

    /// Handles of resident children.
    pub fn resident_children(&self) -> Vec<PageId> {
        match self {
            Body::Leaf { .. } => Vec::new(),
            Body::Node { children, .. } => children.iter().filter_map(|c| c.page).collect(),
        }
    }

    pub fn to_page_data(&self) -> Result<PageData> {
        match self {
            Body::Leaf { keys, values } => Ok(PageData::Leaf {
                keys: keys.clone(),
                values: values.clone(),
            }),
            Body::Node { keys, children } => {
                let children = children
                    .iter()
                    .map(|c| {
                        c.addr.ok_or_else(|| {
                            Error::ConsistencyViolation("writing node with a dirty child".into())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(PageData::Node {
                    keys: keys.clone(),
                    children,
                })
            }
        }
    }
}

impl From<PageData> for Body {
    fn from(data: PageData) -> Self {
        match data {
            PageData::Leaf { keys, values } => Body::Leaf { keys, values },
            PageData::Node { keys, children } => Body::Node {
                keys,
                children: children.into_iter().map(Child::stored).collect(),
            },
        }
    }
}

/// A resident page of a mutable tree.
#[derive(Debug)]
pub(crate) struct Page {
    /// Set once persisted. A persistent page is immutable; mutation goes
    /// through a copy.
    pub addr: Option<Address>,
    pub parent: Option<PageId>,
    /// Number of retention queue slots holding this page.
    pub reference_count: u32,
    /// Superseded by a copy or merged away. Never written.
    pub deleted: bool,
    pub body: Body,
}

impl Page {
    pub fn dirty(parent: Option<PageId>, body: Body) -> Self {
        Page {
            addr: None,
            parent,
            reference_count: 0,
            deleted: false,
            body,
        }
    }

    pub fn loaded(addr: Address, parent: Option<PageId>, data: PageData) -> Self {
        Page {
            addr: Some(addr),
            parent,
            reference_count: 0,
            deleted: false,
            body: data.into(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.addr.is_some()
    }
}

/// Slab of resident pages addressed by [`PageId`].
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Option<Page>>,
    free: Vec<u32>,
    resident: usize,
}

impl Arena {
    pub fn alloc(&mut self, page: Page) -> PageId {
        self.resident += 1;
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(page);
                PageId(i)
            }
            None => {
                self.slots.push(Some(page));
                PageId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn release(&mut self, id: PageId) -> Option<Page> {
        let page = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        self.resident -= 1;
        Some(page)
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.resident
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageId, &Page)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (PageId(i as u32), p)))
    }
}

impl Index<PageId> for Arena {
    type Output = Page;

    fn index(&self, id: PageId) -> &Page {
        self.get(id)
            .unwrap_or_else(|| panic!("page {id:?} is not resident"))
    }
}

impl IndexMut<PageId> for Arena {
    fn index_mut(&mut self, id: PageId) -> &mut Page {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("page {id:?} is not resident"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused() {
        let mut arena = Arena::default();
        let a = arena.alloc(Page::dirty(None, Body::empty_leaf()));
        let b = arena.alloc(Page::dirty(None, Body::empty_leaf()));
        assert_eq!(arena.len(), 2);
        assert!(arena.release(a).is_some());
        assert!(arena.release(a).is_none());
        let c = arena.alloc(Page::dirty(None, Body::empty_leaf()));
        assert_eq!(c, a);
        assert_ne!(c, b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn node_with_dirty_child_cannot_be_encoded() {
        let mut arena = Arena::default();
        let child = arena.alloc(Page::dirty(None, Body::empty_leaf()));
        let body = Body::Node {
            keys: vec![],
            children: vec![Child::dirty(child)],
        };
        assert!(matches!(
            body.to_page_data(),
            Err(Error::ConsistencyViolation(_))
        ));
    }
}
