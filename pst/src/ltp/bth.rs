//! BTH: a B-tree whose nodes are heap allocations.
//!
//! ```text
//! BTHHEADER    bType 0xB5 | cbKey | cbEnt | bIdxLevels | hidRoot u32
//! index node   { key [cbKey], hid u32 } ...       (bIdxLevels > 0)
//! leaf node    { key [cbKey], data [cbEnt] } ...  (level 0)
//! ```
//!
//! Every node is one allocation holding packed records sorted by key. An
//! index record's key is the lowest key below its child.

use crate::error::{Error, Location};
use crate::ltp::heap::Heap;
use crate::ndb::{Hid, read_u32};

/// `bType` of a BTH header.
pub const BTH_SIGNATURE: u8 = 0xB5;

/// Size of the BTH header allocation.
pub const BTH_HEADER_SIZE: usize = 8;

/// Read a little-endian key of up to 8 bytes.
fn read_key(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// One node of the tree: its packed records.
#[derive(Clone, Copy)]
struct BthNode<'h> {
    hid: Hid,
    level: u8,
    records: &'h [u8],
    record_size: usize,
    key_size: usize,
}

impl<'h> BthNode<'h> {
    fn len(&self) -> usize {
        self.records.len() / self.record_size
    }

    fn record(&self, i: usize) -> &'h [u8] {
        &self.records[i * self.record_size..(i + 1) * self.record_size]
    }

    fn key(&self, i: usize) -> u64 {
        read_key(&self.record(i)[..self.key_size])
    }

    fn value(&self, i: usize) -> &'h [u8] {
        &self.record(i)[self.key_size..]
    }

    fn child(&self, i: usize) -> Hid {
        Hid(read_u32(self.value(i), 0))
    }

    /// Key range under index record `i`, given this node's own exclusive
    /// upper bound.
    fn child_range(&self, i: usize, upper: Option<u64>) -> (u64, Option<u64>) {
        let next = (i + 1 < self.len()).then(|| self.key(i + 1));
        (self.key(i), next.or(upper))
    }

    /// A child must be non-empty and keep its keys inside `[lower, upper)`.
    fn check_range(&self, (lower, upper): (u64, Option<u64>)) -> Result<(), Error> {
        let at = Location::Heap(self.hid);
        if self.len() == 0 {
            return Err(Error::corrupt(at, "empty BTH node below the root"));
        }
        let (first, last) = (self.key(0), self.key(self.len() - 1));
        if first < lower || upper.is_some_and(|upper| last >= upper) {
            return Err(Error::corrupt(
                at,
                format!("BTH node keys 0x{first:x}..=0x{last:x} outside their index record"),
            ));
        }
        Ok(())
    }

    fn search(&self, key: u64) -> Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key(mid).cmp(&key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

/// An open BTH inside a heap.
#[derive(Clone, Copy)]
pub struct Bth<'h> {
    heap: &'h Heap,
    key_size: usize,
    entry_size: usize,
    levels: u8,
    root: Option<Hid>,
}

impl<'h> Bth<'h> {
    /// Open the BTH whose header is the allocation `hid`.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` when `hid` does not resolve, `CorruptStructure` for
    /// a bad signature or key width.
    pub fn open(heap: &'h Heap, hid: Hid) -> Result<Self, Error> {
        let header = heap.resolve(hid)?;
        let at = Location::Heap(hid);
        if header.len() < BTH_HEADER_SIZE {
            return Err(Error::corrupt(at, "BTH header truncated"));
        }
        if header[0] != BTH_SIGNATURE {
            return Err(Error::corrupt(
                at,
                format!("bad BTH signature 0x{:02x}", header[0]),
            ));
        }
        let key_size = usize::from(header[1]);
        if !(1..=8).contains(&key_size) {
            return Err(Error::corrupt(at, format!("unsupported key size {key_size}")));
        }
        let entry_size = usize::from(header[2]);
        if entry_size == 0 {
            return Err(Error::corrupt(at, "zero entry size"));
        }
        let root = Hid(read_u32(header, 4));

        Ok(Self {
            heap,
            key_size,
            entry_size,
            levels: header[3],
            root: (root.0 != 0).then_some(root),
        })
    }

    #[must_use]
    pub const fn key_size(&self) -> usize {
        self.key_size
    }

    #[must_use]
    pub const fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Number of index levels above the leaves.
    #[must_use]
    pub const fn levels(&self) -> u8 {
        self.levels
    }

    fn node(&self, hid: Hid, level: u8) -> Result<BthNode<'h>, Error> {
        let records = self.heap.resolve(hid)?;
        let record_size = self.key_size + if level == 0 { self.entry_size } else { 4 };
        if records.len() % record_size != 0 {
            return Err(Error::corrupt(
                Location::Heap(hid),
                format!(
                    "BTH node of {} bytes is not a multiple of {record_size}",
                    records.len()
                ),
            ));
        }
        let node = BthNode {
            hid,
            level,
            records,
            record_size,
            key_size: self.key_size,
        };
        for i in 1..node.len() {
            if node.key(i - 1) >= node.key(i) {
                return Err(Error::corrupt(
                    Location::Heap(hid),
                    format!("BTH keys out of order at record {i}"),
                ));
            }
        }
        Ok(node)
    }

    /// Find the data stored under `key`.
    pub fn lookup(&self, key: u64) -> Result<Option<&'h [u8]>, Error> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let mut node = self.node(root, self.levels)?;
        let mut upper = None;

        while node.level > 0 {
            let i = match node.search(key) {
                Ok(i) => i,
                Err(0) => return Ok(None),
                Err(i) => i - 1,
            };
            let range = node.child_range(i, upper);
            node = self.node(node.child(i), node.level - 1)?;
            node.check_range(range)?;
            upper = range.1;
        }
        Ok(node.search(key).ok().map(|i| node.value(i)))
    }

    /// Iterate every leaf record in key order.
    ///
    /// Restartable: each call walks from the root again. After an error
    /// the iterator ends.
    #[must_use]
    pub const fn iter(&self) -> BthIter<'h> {
        BthIter {
            bth: *self,
            stack: Vec::new(),
            started: false,
        }
    }
}

/// Lazy in-order walk of a BTH.
pub struct BthIter<'h> {
    bth: Bth<'h>,
    /// Nodes with the next record to visit and their exclusive upper bound.
    stack: Vec<(BthNode<'h>, usize, Option<u64>)>,
    started: bool,
}

impl<'h> Iterator for BthIter<'h> {
    type Item = Result<(u64, &'h [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let root = self.bth.root?;
            match self.bth.node(root, self.bth.levels) {
                Ok(node) => self.stack.push((node, 0, None)),
                Err(e) => return Some(Err(e)),
            }
        }

        loop {
            let (node, idx, upper) = self.stack.last_mut()?;
            if *idx >= node.len() {
                self.stack.pop();
                continue;
            }
            let i = *idx;
            *idx += 1;
            let node = *node;

            if node.level == 0 {
                return Some(Ok((node.key(i), node.value(i))));
            }
            let range = node.child_range(i, *upper);
            let child = self
                .bth
                .node(node.child(i), node.level - 1)
                .and_then(|child| child.check_range(range).map(|()| child));
            match child {
                Ok(child) => self.stack.push((child, 0, range.1)),
                Err(e) => {
                    tracing::debug!("BTH walk stopped below {}: {e}", node.hid);
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
