//! Disk-resident B+trees: the block B-tree (BBT) and the node B-tree (NBT).
//!
//! Both trees share one page format and differ only in the leaf entry:
//! - Branch entries (both trees): `key u64, BREF child` (24 bytes)
//! - BBT leaf: `BREF, cb u16, cRef u16, padding u32` (24 bytes)
//! - NBT leaf: `nid u64, bidData u64, bidSub u64, nidParent u32, pad` (32)
//!
//! A branch entry's key is the lowest key stored below its child, so a
//! lookup descends into the last entry whose key is `<=` the target.

use std::marker::PhantomData;

use crate::error::{Error, Location};
use crate::ndb::header::{Bref, CryptMethod};
use crate::ndb::page::{BTreePage, PageType, read_u16, read_u32, read_u64};
use crate::ndb::source::ReadRange;
use crate::ndb::{Bid, Nid};

/// Size of a branch entry.
const BRANCH_ENTRY_SIZE: usize = 24;

/// Deepest tree accepted. The page's `cLevel` is one byte, but real trees
/// stay in single digits; this bounds work on a corrupt root level.
const MAX_LEVEL: u8 = 16;

/// A leaf entry of the block B-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub bid: Bid,
    /// Absolute file offset of the block.
    pub offset: u64,
    /// Size of the block's data, excluding padding and trailer.
    pub size: u16,
    pub ref_count: u16,
}

impl BlockEntry {
    /// Size of the block on disk: data and trailer, rounded up to 64 bytes.
    #[must_use]
    pub const fn disk_size(&self) -> usize {
        (self.size as usize + 16).div_ceil(64) * 64
    }

    /// Whether the block's payload is stored encoded under `method`.
    ///
    /// Only external blocks are encoded; data tree and sub-node blocks are
    /// always stored plain.
    #[must_use]
    pub const fn is_encoded(&self, method: CryptMethod) -> bool {
        !self.bid.is_internal() && !matches!(method, CryptMethod::None)
    }
}

/// A leaf entry of the node B-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub nid: Nid,
    pub data_bid: Bid,
    /// `None` when the node has no sub-node tree.
    pub sub_bid: Option<Bid>,
    pub parent: Nid,
}

/// Describes how one of the two trees stores its leaves.
pub trait EntryKind {
    type Entry;
    const PAGE_TYPE: PageType;
    const LEAF_ENTRY_SIZE: usize;

    fn parse_leaf(bytes: &[u8]) -> Self::Entry;
}

/// Marker for the block B-tree.
#[derive(Debug, Clone, Copy)]
pub struct BlockTree;

impl EntryKind for BlockTree {
    type Entry = BlockEntry;
    const PAGE_TYPE: PageType = PageType::BlockBTree;
    const LEAF_ENTRY_SIZE: usize = 24;

    fn parse_leaf(bytes: &[u8]) -> BlockEntry {
        let bref = Bref::from_bytes(&bytes[..Bref::SIZE]);
        BlockEntry {
            bid: bref.bid,
            offset: bref.ib,
            size: read_u16(bytes, 16),
            ref_count: read_u16(bytes, 18),
        }
    }
}

/// Marker for the node B-tree.
#[derive(Debug, Clone, Copy)]
pub struct NodeTree;

impl EntryKind for NodeTree {
    type Entry = NodeEntry;
    const PAGE_TYPE: PageType = PageType::NodeBTree;
    const LEAF_ENTRY_SIZE: usize = 32;

    #[allow(clippy::cast_possible_truncation)] // NIDs are 32-bit, padded to 64 on disk
    fn parse_leaf(bytes: &[u8]) -> NodeEntry {
        let sub_bid = Bid(read_u64(bytes, 16));
        NodeEntry {
            nid: Nid(read_u64(bytes, 0) as u32),
            data_bid: Bid(read_u64(bytes, 8)),
            sub_bid: (!sub_bid.is_null()).then_some(sub_bid),
            parent: Nid(read_u32(bytes, 24)),
        }
    }
}

/// A read-only view of one of the on-disk B-trees.
pub struct BTree<'a, K> {
    source: &'a dyn ReadRange,
    root: Bref,
    verify_crc: bool,
    kind: PhantomData<K>,
}

impl<K> Clone for BTree<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for BTree<'_, K> {}

impl<'a, K: EntryKind> BTree<'a, K> {
    #[must_use]
    pub fn new(source: &'a dyn ReadRange, root: Bref, verify_crc: bool) -> Self {
        Self {
            source,
            root,
            verify_crc,
            kind: PhantomData,
        }
    }

    /// Load and validate one page.
    ///
    /// `expected_level` is `None` for the root; below the root every child
    /// must sit exactly one level under its parent.
    fn load(&self, bref: Bref, expected_level: Option<u8>) -> Result<BTreePage, Error> {
        let page = BTreePage::read(self.source, bref, K::PAGE_TYPE, self.verify_crc)?;
        let at = Location::Offset(bref.ib);

        if let Some(expected) = expected_level {
            if page.level != expected {
                return Err(Error::corrupt(
                    at,
                    format!("page level {} where {expected} was expected", page.level),
                ));
            }
        } else if page.level > MAX_LEVEL {
            return Err(Error::corrupt(
                at,
                format!("root level {} exceeds {MAX_LEVEL}", page.level),
            ));
        }

        let expected_size = if page.level == 0 {
            K::LEAF_ENTRY_SIZE
        } else {
            BRANCH_ENTRY_SIZE
        };
        if page.entry_size != expected_size {
            return Err(Error::corrupt(
                at,
                format!(
                    "entry size {} where {expected_size} was expected",
                    page.entry_size
                ),
            ));
        }
        page.check_order()?;
        Ok(page)
    }

    /// Look up the entry stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent; this is a defined miss.
    pub fn lookup(&self, key: u64) -> Result<Option<K::Entry>, Error> {
        let mut page = self.load(self.root, None)?;
        let mut upper = None;

        while page.level > 0 {
            // Last entry whose key is <= the target.
            let idx = match binary_search(&page, key) {
                Ok(i) => i,
                Err(0) => return Ok(None),
                Err(i) => i - 1,
            };
            let child = Bref::from_bytes(&page.entry(idx)[8..8 + Bref::SIZE]);
            let range = child_range(&page, idx, upper);
            tracing::trace!(
                "descend level {} -> page 0x{:x} for key 0x{key:x}",
                page.level,
                child.ib
            );
            page = self.load(child, Some(page.level - 1))?;
            check_range(&page, child, range)?;
            upper = range.1;
        }

        Ok(binary_search(&page, key)
            .ok()
            .map(|i| K::parse_leaf(page.entry(i))))
    }

    /// Iterate over every leaf entry in key order.
    ///
    /// The iterator is lazy and re-walks from the root each time this is
    /// called. A page that fails validation is reported once and its
    /// subtree skipped; the walk continues with its siblings.
    #[must_use]
    pub const fn iter(&self) -> BTreeIter<'a, K> {
        BTreeIter {
            tree: *self,
            stack: Vec::new(),
            started: false,
            failed_key: None,
        }
    }
}

/// Reject a child page whose keys fall outside the range its parent entry
/// covers: `[lower, upper)`, with no upper bound under the last entry of the
/// rightmost spine. A page referenced from two entries, or from its own
/// subtree, always fails this for at least one of them.
fn check_range(
    page: &BTreePage,
    bref: Bref,
    (lower, upper): (u64, Option<u64>),
) -> Result<(), Error> {
    let at = Location::Offset(bref.ib);
    if page.is_empty() {
        return Err(Error::corrupt(at, "empty page below the root"));
    }
    let (first, last) = (page.key(0), page.key(page.len() - 1));
    if first < lower {
        return Err(Error::corrupt(
            at,
            format!("first key 0x{first:x} below its branch key 0x{lower:x}"),
        ));
    }
    if let Some(upper) = upper.filter(|&upper| last >= upper) {
        return Err(Error::corrupt(
            at,
            format!("last key 0x{last:x} reaches the next branch key 0x{upper:x}"),
        ));
    }
    Ok(())
}

/// Key range covered by branch entry `index`, given the page's own
/// exclusive upper bound.
fn child_range(page: &BTreePage, index: usize, upper: Option<u64>) -> (u64, Option<u64>) {
    let next = (index + 1 < page.len()).then(|| page.key(index + 1));
    (page.key(index), next.or(upper))
}

/// Binary search over the u64 keys of a page.
fn binary_search(page: &BTreePage, key: u64) -> Result<usize, usize> {
    let (mut lo, mut hi) = (0, page.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match page.key(mid).cmp(&key) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Ok(mid),
        }
    }
    Err(lo)
}

/// Lazy full scan over a B-tree.
pub struct BTreeIter<'a, K> {
    tree: BTree<'a, K>,
    /// Loaded pages with the index of the next entry to visit and the
    /// exclusive upper bound on the page's keys.
    stack: Vec<(BTreePage, usize, Option<u64>)>,
    started: bool,
    failed_key: Option<u64>,
}

impl<K> BTreeIter<'_, K> {
    /// Lowest key of the subtree behind the most recent error, when the
    /// error came from a child page. Root failures have no key.
    #[must_use]
    pub const fn last_failed_key(&self) -> Option<u64> {
        self.failed_key
    }
}

impl<K: EntryKind> Iterator for BTreeIter<'_, K> {
    type Item = Result<K::Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            match self.tree.load(self.tree.root, None) {
                Ok(page) => self.stack.push((page, 0, None)),
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            let (page, idx, upper) = self.stack.last_mut()?;
            if *idx >= page.len() {
                self.stack.pop();
                continue;
            }
            let i = *idx;
            *idx += 1;

            if page.level == 0 {
                return Some(Ok(K::parse_leaf(page.entry(i))));
            }

            let child = Bref::from_bytes(&page.entry(i)[8..8 + Bref::SIZE]);
            let level = page.level - 1;
            let key = page.key(i);
            let range = child_range(page, i, *upper);
            let loaded = self.tree.load(child, Some(level)).and_then(|child_page| {
                check_range(&child_page, child, range)?;
                Ok(child_page)
            });
            match loaded {
                Ok(child_page) => self.stack.push((child_page, 0, range.1)),
                Err(e) => {
                    tracing::warn!("skipping B-tree subtree at 0x{:x}: {e}", child.ib);
                    self.failed_key = Some(key);
                    return Some(Err(e));
                }
            }
        }
    }
}
