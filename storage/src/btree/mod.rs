//! B-tree mapping 64-bit row ids to opaque payloads.
//!
//! Leaves hold the rows and form a singly linked list in key order.
//! Internal nodes hold separators: child `i` covers keys in
//! `[cells[i - 1].key, cells[i].key)`. A table's root page number never
//! changes; when the root splits, its halves move to fresh pages and the
//! root is rewritten as an internal node above them.

mod cursor;
mod node;

pub use cursor::Cursor;
pub use node::MAX_PAYLOAD_SIZE;

use crate::page::{HEADER_PAGE, PAGE_SIZE};
use crate::pager::Pager;
use crate::{PageNo, Result, StorageError};
use node::{InternalCell, InternalNode, LeafCell, LeafNode, Node};
use std::collections::HashSet;

/// Deeper than any tree of 4 KiB pages can legitimately grow; hitting it
/// means a cycle in corrupt data.
const MAX_DEPTH: usize = 64;

pub struct BTree {
    pager: Pager,
}

impl BTree {
    pub fn new(pager: Pager) -> Self {
        Self { pager }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub fn into_pager(self) -> Pager {
        self.pager
    }

    pub fn flush(&mut self) -> Result<()> {
        self.pager.flush()
    }

    fn read_node(&mut self, pgno: PageNo) -> Result<Node> {
        // Never extend the file by reading: only allocated pages hold nodes.
        if pgno <= HEADER_PAGE || pgno > self.pager.page_count() {
            return Err(StorageError::InvalidPage(pgno));
        }
        let page = self.pager.get(pgno)?;
        Node::decode(pgno, page.data())
    }

    fn read_leaf(&mut self, pgno: PageNo) -> Result<LeafNode> {
        match self.read_node(pgno)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(StorageError::Corrupt {
                page: pgno,
                reason: "expected a leaf node".to_string(),
            }),
        }
    }

    fn write_node(&mut self, pgno: PageNo, node: &Node) -> Result<()> {
        let page = self.pager.get(pgno)?;
        node.encode(pgno, page.data_mut())?;
        page.mark_dirty();
        Ok(())
    }

    /// Allocates the root page of a new, empty table.
    pub fn create_table(&mut self) -> Result<PageNo> {
        let root = self.pager.alloc()?;
        self.write_node(root, &Node::Leaf(LeafNode::default()))?;
        log::debug!("created table with root page {}", root);
        Ok(root)
    }

    /// Inserts `payload` under `rowid`, replacing any existing payload for
    /// that row id.
    pub fn insert(&mut self, root: PageNo, rowid: i64, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(StorageError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // The root absorbs its own splits, so nothing can come back up.
        let promoted = self.insert_into(root, root, rowid, payload, 0)?;
        debug_assert!(promoted.is_none());
        Ok(())
    }

    /// Returns the `(separator, new right page)` pair the parent must absorb
    /// when `pgno` had to split.
    fn insert_into(
        &mut self,
        root: PageNo,
        pgno: PageNo,
        rowid: i64,
        payload: &[u8],
        depth: usize,
    ) -> Result<Option<(i64, PageNo)>> {
        if depth > MAX_DEPTH {
            return Err(StorageError::Corrupt {
                page: pgno,
                reason: "tree deeper than any valid tree".to_string(),
            });
        }

        match self.read_node(pgno)? {
            Node::Leaf(mut leaf) => {
                match leaf.search(rowid) {
                    (idx, true) => leaf.cells[idx].payload = payload.to_vec(),
                    (idx, false) => leaf.cells.insert(
                        idx,
                        LeafCell {
                            rowid,
                            payload: payload.to_vec(),
                        },
                    ),
                }

                if leaf.size() <= PAGE_SIZE {
                    self.write_node(pgno, &Node::Leaf(leaf))?;
                    return Ok(None);
                }

                let right = leaf.split();
                let separator = right.cells[0].rowid;
                self.place_split(root, pgno, Node::Leaf(leaf), Node::Leaf(right), separator)
            }
            Node::Internal(mut internal) => {
                let idx = internal.child_index(rowid);
                let child = internal.child_at(idx);

                let Some((key, new_child)) =
                    self.insert_into(root, child, rowid, payload, depth + 1)?
                else {
                    return Ok(None);
                };

                internal.cells.insert(
                    idx,
                    InternalCell {
                        key,
                        child: new_child,
                    },
                );

                if internal.size() <= PAGE_SIZE {
                    self.write_node(pgno, &Node::Internal(internal))?;
                    return Ok(None);
                }

                let (separator, right) = internal.split();
                self.place_split(
                    root,
                    pgno,
                    Node::Internal(internal),
                    Node::Internal(right),
                    separator,
                )
            }
        }
    }

    /// Writes the two halves of a split node. A non-root node keeps its
    /// page for the left half; the root moves both halves to new pages and
    /// becomes their parent.
    fn place_split(
        &mut self,
        root: PageNo,
        pgno: PageNo,
        mut left: Node,
        right: Node,
        separator: i64,
    ) -> Result<Option<(i64, PageNo)>> {
        let left_pgno = if pgno == root {
            self.pager.alloc()?
        } else {
            pgno
        };
        let right_pgno = self.pager.alloc()?;

        // The right leaf already carries the old next pointer.
        if let Node::Leaf(leaf) = &mut left {
            leaf.next = right_pgno;
        }

        self.write_node(left_pgno, &left)?;
        self.write_node(right_pgno, &right)?;

        log::debug!(
            "split page {} of table {}: {} | {} at key {}",
            pgno,
            root,
            left_pgno,
            right_pgno,
            separator
        );

        if pgno != root {
            return Ok(Some((separator, right_pgno)));
        }

        let new_root = InternalNode {
            leftmost: left_pgno,
            cells: vec![InternalCell {
                key: separator,
                child: right_pgno,
            }],
        };
        self.write_node(root, &Node::Internal(new_root))?;
        Ok(None)
    }

    pub fn open(&self, root: PageNo) -> Cursor {
        Cursor::new(root)
    }

    /// Positions `cursor` on the first row with `rowid >= key` (or past the
    /// end when there is none) and reports whether `key` itself exists.
    /// `i64::MIN` positions on the first row.
    pub fn seek(&mut self, cursor: &mut Cursor, key: i64) -> Result<bool> {
        let mut pgno = cursor.root;
        let mut depth = 0;
        let leaf = loop {
            match self.read_node(pgno)? {
                Node::Leaf(leaf) => break leaf,
                Node::Internal(internal) => {
                    depth += 1;
                    if depth > MAX_DEPTH {
                        return Err(StorageError::Corrupt {
                            page: pgno,
                            reason: "descent does not terminate".to_string(),
                        });
                    }
                    pgno = internal.child_at(internal.child_index(key));
                }
            }
        };

        let (idx, found) = leaf.search(key);
        cursor.pgno = pgno;
        cursor.idx = idx;

        if idx >= leaf.cells.len() {
            // Everything here is smaller; the answer starts in a later leaf.
            self.advance_leaf(cursor, leaf.next)?;
        }
        Ok(found)
    }

    /// Moves to the next row in key order. Returns false, leaving the
    /// cursor past the end, when there is no next row.
    pub fn next(&mut self, cursor: &mut Cursor) -> Result<bool> {
        if !cursor.is_positioned() {
            return Ok(false);
        }

        let leaf = self.read_leaf(cursor.pgno)?;
        if cursor.idx + 1 < leaf.cells.len() {
            cursor.idx += 1;
            return Ok(true);
        }

        cursor.idx = leaf.cells.len();
        self.advance_leaf(cursor, leaf.next)
    }

    /// Follows the leaf chain from `next` to the first leaf with a row.
    fn advance_leaf(&mut self, cursor: &mut Cursor, mut next: PageNo) -> Result<bool> {
        let mut hops = 0;
        while next != 0 {
            hops += 1;
            if hops > self.pager.page_count() {
                return Err(StorageError::Corrupt {
                    page: next,
                    reason: "leaf chain loops".to_string(),
                });
            }

            let leaf = self.read_leaf(next)?;
            if !leaf.cells.is_empty() {
                cursor.pgno = next;
                cursor.idx = 0;
                return Ok(true);
            }
            next = leaf.next;
        }
        Ok(false)
    }

    fn current_cell(&mut self, cursor: &Cursor) -> Result<Option<LeafCell>> {
        if !cursor.is_positioned() {
            return Ok(None);
        }
        let mut leaf = self.read_leaf(cursor.pgno)?;
        if cursor.idx < leaf.cells.len() {
            Ok(Some(leaf.cells.swap_remove(cursor.idx)))
        } else {
            Ok(None)
        }
    }

    /// Row id under the cursor, `None` when it is not on a row.
    pub fn key(&mut self, cursor: &Cursor) -> Result<Option<i64>> {
        Ok(self.current_cell(cursor)?.map(|cell| cell.rowid))
    }

    /// Payload under the cursor, `None` when it is not on a row.
    pub fn read_payload(&mut self, cursor: &Cursor) -> Result<Option<Vec<u8>>> {
        Ok(self.current_cell(cursor)?.map(|cell| cell.payload))
    }

    /// Largest row id in the table, following the rightmost path.
    pub fn max_rowid(&mut self, root: PageNo) -> Result<Option<i64>> {
        let mut pgno = root;
        for _ in 0..=MAX_DEPTH {
            match self.read_node(pgno)? {
                Node::Leaf(leaf) => return Ok(leaf.cells.last().map(|cell| cell.rowid)),
                Node::Internal(internal) => pgno = internal.child_at(internal.cells.len()),
            }
        }
        Err(StorageError::Corrupt {
            page: pgno,
            reason: "descent does not terminate".to_string(),
        })
    }

    /// Verifies the structure of the tree rooted at `root`. Returns
    /// `Ok(false)` at the first violation; only I/O failures are errors.
    pub fn check(&mut self, root: PageNo) -> Result<bool> {
        let mut walk = CheckWalk::default();
        if !self.check_node(root, None, None, 0, &mut walk)? {
            return Ok(false);
        }
        self.check_chain(root, &walk.leaves)
    }

    fn check_node(
        &mut self,
        pgno: PageNo,
        lo: Option<i64>,
        hi: Option<i64>,
        depth: usize,
        walk: &mut CheckWalk,
    ) -> Result<bool> {
        if pgno <= HEADER_PAGE || pgno > self.pager.page_count() {
            return Ok(violation(pgno, "page number out of range"));
        }
        if depth > MAX_DEPTH || !walk.visited.insert(pgno) {
            return Ok(violation(pgno, "page reached twice"));
        }

        let node = match self.read_node(pgno) {
            Ok(node) => node,
            Err(StorageError::Corrupt { reason, .. }) => return Ok(violation(pgno, &reason)),
            Err(e) => return Err(e),
        };
        if !node.fits() {
            return Ok(violation(pgno, "node larger than a page"));
        }

        let in_bounds =
            |key: i64| lo.map_or(true, |lo| key >= lo) && hi.map_or(true, |hi| key < hi);

        match node {
            Node::Leaf(leaf) => {
                let keys: Vec<i64> = leaf.cells.iter().map(|cell| cell.rowid).collect();
                if !strictly_increasing(&keys) {
                    return Ok(violation(pgno, "leaf keys out of order"));
                }
                if !keys.iter().all(|&k| in_bounds(k)) {
                    return Ok(violation(pgno, "leaf key outside parent bounds"));
                }
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Ok(violation(pgno, "leaves at different depths"))
                    }
                    Some(_) => {}
                }
                walk.leaves.push(pgno);
                Ok(true)
            }
            Node::Internal(internal) => {
                let keys: Vec<i64> = internal.cells.iter().map(|cell| cell.key).collect();
                if !strictly_increasing(&keys) {
                    return Ok(violation(pgno, "separators out of order"));
                }
                if !keys.iter().all(|&k| in_bounds(k)) {
                    return Ok(violation(pgno, "separator outside parent bounds"));
                }

                for (idx, child) in internal.children().enumerate() {
                    let child_lo = if idx == 0 { lo } else { Some(keys[idx - 1]) };
                    let child_hi = keys.get(idx).copied().or(hi);
                    if !self.check_node(child, child_lo, child_hi, depth + 1, walk)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// The next pointers must visit exactly the in-order leaves, and keys
    /// must keep increasing across leaf boundaries.
    fn check_chain(&mut self, root: PageNo, leaves: &[PageNo]) -> Result<bool> {
        let mut prev: Option<i64> = None;
        for (i, &pgno) in leaves.iter().enumerate() {
            let leaf = self.read_leaf(pgno)?;

            if let (Some(prev), Some(first)) = (prev, leaf.cells.first()) {
                if first.rowid <= prev {
                    return Ok(violation(pgno, "keys decrease across leaves"));
                }
            }
            if let Some(last) = leaf.cells.last() {
                prev = Some(last.rowid);
            }

            let expected = leaves.get(i + 1).copied().unwrap_or(0);
            if leaf.next != expected {
                return Ok(violation(pgno, "leaf chain skips or reorders leaves"));
            }
        }

        log::trace!("table {} passed check with {} leaves", root, leaves.len());
        Ok(true)
    }
}

#[derive(Default)]
struct CheckWalk {
    leaves: Vec<PageNo>,
    leaf_depth: Option<usize>,
    visited: HashSet<PageNo>,
}

fn violation(pgno: PageNo, reason: &str) -> bool {
    log::warn!("btree check failed at page {}: {}", pgno, reason);
    false
}

fn strictly_increasing(keys: &[i64]) -> bool {
    keys.windows(2).all(|pair| pair[0] < pair[1])
}
