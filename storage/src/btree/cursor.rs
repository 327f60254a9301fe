use crate::PageNo;

/// A resumable position in one table's B-tree.
///
/// `pgno == 0` means the cursor has been opened but not positioned yet. Once
/// positioned, `pgno` is always a leaf and `idx` may equal the leaf's cell
/// count, which is the "past the end" position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub root: PageNo,
    pub pgno: PageNo,
    pub idx: usize,
}

impl Cursor {
    pub fn new(root: PageNo) -> Self {
        Self {
            root,
            pgno: 0,
            idx: 0,
        }
    }

    pub fn is_positioned(&self) -> bool {
        self.pgno != 0
    }
}
