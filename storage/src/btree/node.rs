//! On-page node format.
//!
//! Both node kinds share an 8-byte header:
//!
//! ```text
//! 0      1          2            4                 8
//! +------+----------+------------+-----------------+
//! | kind | reserved | cell count | next / leftmost |
//! +------+----------+------------+-----------------+
//! ```
//!
//! Leaf cells are `rowid: i64 | len: u16 | payload`, internal cells are
//! `key: i64 | child: u32`. All integers are little-endian.

use crate::page::PAGE_SIZE;
use crate::{PageNo, Result, StorageError};

pub const NODE_HEADER_SIZE: usize = 8;
pub const LEAF_CELL_HEADER_SIZE: usize = 10;
pub const INTERNAL_CELL_SIZE: usize = 12;

/// Bytes available for cells in one node.
pub const USABLE_SIZE: usize = PAGE_SIZE - NODE_HEADER_SIZE;

/// A leaf cell may take at most half of the usable area, which guarantees
/// that a size-based split always leaves two halves that fit.
pub const MAX_CELL_SIZE: usize = USABLE_SIZE / 2;

pub const MAX_PAYLOAD_SIZE: usize = MAX_CELL_SIZE - LEAF_CELL_HEADER_SIZE;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub rowid: i64,
    pub payload: Vec<u8>,
}

impl LeafCell {
    pub fn size(&self) -> usize {
        LEAF_CELL_HEADER_SIZE + self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCell {
    pub key: i64,
    pub child: PageNo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    pub next: PageNo,
    pub cells: Vec<LeafCell>,
}

impl LeafNode {
    pub fn size(&self) -> usize {
        NODE_HEADER_SIZE + self.cells.iter().map(LeafCell::size).sum::<usize>()
    }

    /// Index of the first cell with `rowid >= key`, and whether it matches.
    pub fn search(&self, key: i64) -> (usize, bool) {
        match self.cells.binary_search_by_key(&key, |cell| cell.rowid) {
            Ok(idx) => (idx, true),
            Err(idx) => (idx, false),
        }
    }

    /// Splits at the first cell where the running size passes half of the
    /// usable area. The crossing cell stays on the left.
    pub fn split(&mut self) -> LeafNode {
        let half = USABLE_SIZE / 2;
        let mut acc = 0;
        let mut at = self.cells.len();
        for (i, cell) in self.cells.iter().enumerate() {
            acc += cell.size();
            if acc > half {
                at = i + 1;
                break;
            }
        }
        let at = at.clamp(1, self.cells.len().saturating_sub(1).max(1));

        LeafNode {
            next: self.next,
            cells: self.cells.split_off(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub leftmost: PageNo,
    pub cells: Vec<InternalCell>,
}

impl InternalNode {
    pub fn size(&self) -> usize {
        NODE_HEADER_SIZE + self.cells.len() * INTERNAL_CELL_SIZE
    }

    /// Position of the child covering `key`: the number of separators that
    /// are `<= key`. Position 0 is the leftmost child.
    pub fn child_index(&self, key: i64) -> usize {
        self.cells.partition_point(|cell| cell.key <= key)
    }

    pub fn child_at(&self, idx: usize) -> PageNo {
        if idx == 0 {
            self.leftmost
        } else {
            self.cells[idx - 1].child
        }
    }

    /// Every child page in key order.
    pub fn children(&self) -> impl Iterator<Item = PageNo> + '_ {
        std::iter::once(self.leftmost).chain(self.cells.iter().map(|cell| cell.child))
    }

    /// Splits at the cell-count midpoint. Returns the promoted key and the
    /// right half; the promoted cell's child becomes the right half's
    /// leftmost child.
    pub fn split(&mut self) -> (i64, InternalNode) {
        let mid = self.cells.len() / 2;
        let mut right_cells = self.cells.split_off(mid);
        let promoted = right_cells.remove(0);
        (
            promoted.key,
            InternalNode {
                leftmost: promoted.child,
                cells: right_cells,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn size(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.size(),
            Node::Internal(internal) => internal.size(),
        }
    }

    pub fn fits(&self) -> bool {
        self.size() <= PAGE_SIZE
    }

    pub fn decode(pgno: PageNo, data: &[u8; PAGE_SIZE]) -> Result<Node> {
        let corrupt = |reason: String| StorageError::Corrupt { page: pgno, reason };

        let count = u16::from_le_bytes([data[2], data[3]]) as usize;
        let link = read_u32(data, 4);
        let mut pos = NODE_HEADER_SIZE;

        match data[0] {
            KIND_LEAF => {
                let mut cells = Vec::with_capacity(count.min(USABLE_SIZE / LEAF_CELL_HEADER_SIZE));
                for i in 0..count {
                    if pos + LEAF_CELL_HEADER_SIZE > PAGE_SIZE {
                        return Err(corrupt(format!("leaf cell {} header past page end", i)));
                    }
                    let rowid = read_i64(data, pos);
                    let len = u16::from_le_bytes([data[pos + 8], data[pos + 9]]) as usize;
                    pos += LEAF_CELL_HEADER_SIZE;
                    if pos + len > PAGE_SIZE {
                        return Err(corrupt(format!("leaf cell {} payload past page end", i)));
                    }
                    cells.push(LeafCell {
                        rowid,
                        payload: data[pos..pos + len].to_vec(),
                    });
                    pos += len;
                }
                Ok(Node::Leaf(LeafNode { next: link, cells }))
            }
            KIND_INTERNAL => {
                if NODE_HEADER_SIZE + count * INTERNAL_CELL_SIZE > PAGE_SIZE {
                    return Err(corrupt(format!("{} internal cells cannot fit", count)));
                }
                let cells = (0..count)
                    .map(|i| {
                        let at = NODE_HEADER_SIZE + i * INTERNAL_CELL_SIZE;
                        InternalCell {
                            key: read_i64(data, at),
                            child: read_u32(data, at + 8),
                        }
                    })
                    .collect();
                Ok(Node::Internal(InternalNode {
                    leftmost: link,
                    cells,
                }))
            }
            kind => Err(corrupt(format!("unknown node kind {}", kind))),
        }
    }

    /// Serializes into a page image, zeroing whatever was there before.
    pub fn encode(&self, pgno: PageNo, data: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if !self.fits() {
            return Err(StorageError::PageFull(pgno));
        }

        data.fill(0);
        let mut pos = NODE_HEADER_SIZE;
        match self {
            Node::Leaf(leaf) => {
                data[0] = KIND_LEAF;
                data[2..4].copy_from_slice(&(leaf.cells.len() as u16).to_le_bytes());
                data[4..8].copy_from_slice(&leaf.next.to_le_bytes());
                for cell in &leaf.cells {
                    data[pos..pos + 8].copy_from_slice(&cell.rowid.to_le_bytes());
                    data[pos + 8..pos + 10]
                        .copy_from_slice(&(cell.payload.len() as u16).to_le_bytes());
                    pos += LEAF_CELL_HEADER_SIZE;
                    data[pos..pos + cell.payload.len()].copy_from_slice(&cell.payload);
                    pos += cell.payload.len();
                }
            }
            Node::Internal(internal) => {
                data[0] = KIND_INTERNAL;
                data[2..4].copy_from_slice(&(internal.cells.len() as u16).to_le_bytes());
                data[4..8].copy_from_slice(&internal.leftmost.to_le_bytes());
                for cell in &internal.cells {
                    data[pos..pos + 8].copy_from_slice(&cell.key.to_le_bytes());
                    data[pos + 8..pos + 12].copy_from_slice(&cell.child.to_le_bytes());
                    pos += INTERNAL_CELL_SIZE;
                }
            }
        }
        Ok(())
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_i64(data: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    i64::from_le_bytes(bytes)
}
