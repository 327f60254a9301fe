//! Register-based bytecode interpreter.
//!
//! A program is a flat list of [`Instr`]. Execution starts at instruction 0
//! and runs until `Halt` or until the program counter leaves the program.
//! Jump operands are absolute instruction indices.

use bytes::Bytes;
use minidb_core::{PageNo, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use storage::{decode_record, BTree, Cursor, StorageError};
use thiserror::Error;

/// Upper bounds on operand-addressed state, so a bad operand cannot make
/// the machine allocate without limit.
const MAX_CURSORS: usize = 256;
const MAX_REGISTERS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    OpenRead,
    OpenWrite,
    Rewind,
    SeekGE,
    Column,
    ResultRow,
    Next,
    Integer,
    Insert,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub op: Op,
    pub p1: i64,
    pub p2: i64,
    pub p3: i64,
    pub p4: Bytes,
}

impl Instr {
    pub fn new(op: Op, p1: i64, p2: i64, p3: i64) -> Self {
        Self {
            op,
            p1,
            p2,
            p3,
            p4: Bytes::new(),
        }
    }

    pub fn with_p4(mut self, p4: impl Into<Bytes>) -> Self {
        self.p4 = p4.into();
        self
    }

    pub fn halt() -> Self {
        Self::new(Op::Halt, 0, 0, 0)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {:>4} {:>4} {:>4}", format!("{:?}", self.op), self.p1, self.p2, self.p3)?;
        if !self.p4.is_empty() {
            write!(f, " [{} bytes]", self.p4.len())?;
        }
        Ok(())
    }
}

pub type Program = Vec<Instr>;

pub type Row = Vec<Value>;

/// Resolves a table name to the root page of its B-tree.
pub trait TableLookup {
    fn root_page(&self, name: &str) -> Option<PageNo>;
}

impl<S: BuildHasher> TableLookup for HashMap<String, PageNo, S> {
    fn root_page(&self, name: &str) -> Option<PageNo> {
        self.get(name).copied()
    }
}

#[derive(Error, Debug)]
pub enum VmError {
    #[error("no database is bound to the virtual machine")]
    NoEnvironment,

    #[error("cursor {0} is not open")]
    CursorNotOpen(i64),

    #[error("cursor {0} is not positioned on a row")]
    CursorNotPositioned(i64),

    #[error("register {0} has not been written")]
    UninitializedRegister(i64),

    #[error("register {0} does not hold an integer")]
    NotAnInteger(i64),

    #[error("invalid operand {value} for {op:?}")]
    InvalidOperand { op: Op, value: i64 },

    #[error("jump target {0} is out of range")]
    InvalidJump(i64),

    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("row ids exhausted in table {0}")]
    RowidExhausted(PageNo),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct Env<'env> {
    btree: &'env mut BTree,
    catalog: &'env dyn TableLookup,
}

pub struct Vm<'env> {
    env: Option<Env<'env>>,
    cursors: Vec<Option<Cursor>>,
    registers: Vec<Option<Value>>,
    results: Vec<Row>,
    /// Width of the last row decoded with `Column p2 < 0`.
    column_count: usize,
    next_rowid: i64,
}

impl Default for Vm<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'env> Vm<'env> {
    /// A machine with no database. Programs that only touch registers run;
    /// anything that needs a table fails with [`VmError::NoEnvironment`].
    pub fn new() -> Self {
        Self {
            env: None,
            cursors: Vec::new(),
            registers: Vec::new(),
            results: Vec::new(),
            column_count: 0,
            next_rowid: 1,
        }
    }

    pub fn bound(btree: &'env mut BTree, catalog: &'env dyn TableLookup) -> Self {
        let mut vm = Self::new();
        vm.bind(btree, catalog);
        vm
    }

    pub fn bind(&mut self, btree: &'env mut BTree, catalog: &'env dyn TableLookup) {
        self.env = Some(Env { btree, catalog });
    }

    pub fn is_bound(&self) -> bool {
        self.env.is_some()
    }

    /// Rows emitted by the last `run`.
    pub fn results(&self) -> &[Row] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.results)
    }

    pub fn run(&mut self, program: &[Instr]) -> Result<(), VmError> {
        self.results.clear();
        self.cursors.clear();
        self.registers.clear();
        self.column_count = 0;

        let mut pc = 0;
        while let Some(instr) = program.get(pc) {
            log::trace!("{:>4} {}", pc, instr);
            pc += 1;

            match instr.op {
                Op::Halt => break,

                Op::OpenRead | Op::OpenWrite => {
                    let slot = index_operand(instr.op, instr.p1, MAX_CURSORS)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;
                    let root = if instr.p4.is_empty() {
                        page_operand(instr.op, instr.p2)?
                    } else {
                        let name = String::from_utf8_lossy(&instr.p4);
                        env.catalog
                            .root_page(&name)
                            .ok_or_else(|| VmError::NoSuchTable(name.into_owned()))?
                    };

                    if self.cursors.len() <= slot {
                        self.cursors.resize(slot + 1, None);
                    }
                    self.cursors[slot] = Some(env.btree.open(root));
                }

                Op::Rewind => {
                    let cursor = cursor_mut(&mut self.cursors, instr.p1)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;
                    env.btree.seek(cursor, i64::MIN)?;
                    if env.btree.key(cursor)?.is_none() {
                        pc = jump_target(instr.p2)?;
                    }
                }

                Op::SeekGE => {
                    let key = match read_register(&self.registers, instr.p3)? {
                        Value::Int(key) => *key,
                        Value::Text(_) => return Err(VmError::NotAnInteger(instr.p3)),
                    };
                    let cursor = cursor_mut(&mut self.cursors, instr.p1)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;
                    if !env.btree.seek(cursor, key)? {
                        pc = jump_target(instr.p2)?;
                    }
                }

                Op::Column => {
                    let cursor = cursor_mut(&mut self.cursors, instr.p1)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;
                    let payload = env
                        .btree
                        .read_payload(cursor)?
                        .ok_or(VmError::CursorNotPositioned(instr.p1))?;
                    let row = decode_record(&payload)?;

                    if instr.p2 >= 0 {
                        let value = usize::try_from(instr.p2)
                            .ok()
                            .and_then(|col| row.get(col).cloned())
                            .unwrap_or_default();
                        write_register(&mut self.registers, instr.op, instr.p3, value)?;
                    } else {
                        if row.len() > MAX_REGISTERS {
                            return Err(VmError::InvalidOperand {
                                op: instr.op,
                                value: row.len() as i64,
                            });
                        }
                        self.column_count = row.len();
                        for (reg, value) in row.into_iter().enumerate() {
                            write_register(&mut self.registers, instr.op, reg as i64, value)?;
                        }
                    }
                }

                Op::Next => {
                    let cursor = cursor_mut(&mut self.cursors, instr.p1)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;
                    if env.btree.next(cursor)? {
                        pc = jump_target(instr.p2)?;
                    }
                }

                Op::Integer => {
                    write_register(&mut self.registers, instr.op, instr.p2, Value::Int(instr.p1))?;
                }

                Op::Insert => {
                    let root = page_operand(instr.op, instr.p1)?;
                    let env = self.env.as_mut().ok_or(VmError::NoEnvironment)?;

                    // Never hand out a row id at or below one already stored,
                    // even if this machine's counter is fresh.
                    let after_max = match env.btree.max_rowid(root)? {
                        Some(max) => max.checked_add(1).ok_or(VmError::RowidExhausted(root))?,
                        None => 1,
                    };
                    let rowid = self.next_rowid.max(after_max);
                    env.btree.insert(root, rowid, &instr.p4)?;
                    self.next_rowid = rowid.saturating_add(1);
                    log::trace!("inserted row {} into table {}", rowid, root);
                }

                Op::ResultRow => {
                    let start = index_operand(instr.op, instr.p1, MAX_REGISTERS)?;
                    let width = match instr.p2 {
                        0 => self.column_count,
                        n => index_operand(instr.op, n, MAX_REGISTERS)?,
                    };
                    let row = (start..start + width)
                        .map(|reg| {
                            self.registers
                                .get(reg)
                                .cloned()
                                .flatten()
                                .unwrap_or_default()
                        })
                        .collect();
                    self.results.push(row);
                }
            }
        }

        log::debug!("program finished with {} result rows", self.results.len());
        Ok(())
    }
}

fn index_operand(op: Op, value: i64, limit: usize) -> Result<usize, VmError> {
    usize::try_from(value)
        .ok()
        .filter(|&idx| idx < limit)
        .ok_or(VmError::InvalidOperand { op, value })
}

fn page_operand(op: Op, value: i64) -> Result<PageNo, VmError> {
    PageNo::try_from(value)
        .ok()
        .filter(|&pgno| pgno > 1)
        .ok_or(VmError::InvalidOperand { op, value })
}

/// Targets at or past the end of the program are fine: they halt.
fn jump_target(target: i64) -> Result<usize, VmError> {
    usize::try_from(target).map_err(|_| VmError::InvalidJump(target))
}

fn cursor_mut(cursors: &mut [Option<Cursor>], slot: i64) -> Result<&mut Cursor, VmError> {
    usize::try_from(slot)
        .ok()
        .and_then(|idx| cursors.get_mut(idx))
        .and_then(Option::as_mut)
        .ok_or(VmError::CursorNotOpen(slot))
}

fn read_register(registers: &[Option<Value>], reg: i64) -> Result<&Value, VmError> {
    usize::try_from(reg)
        .ok()
        .and_then(|idx| registers.get(idx))
        .and_then(Option::as_ref)
        .ok_or(VmError::UninitializedRegister(reg))
}

fn write_register(
    registers: &mut Vec<Option<Value>>,
    op: Op,
    reg: i64,
    value: Value,
) -> Result<(), VmError> {
    let idx = index_operand(op, reg, MAX_REGISTERS)?;
    if registers.len() <= idx {
        registers.resize(idx + 1, None);
    }
    registers[idx] = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use storage::{encode_record, MemoryStorage, Pager};

    fn memory_tree() -> BTree {
        BTree::new(Pager::new(Box::new(MemoryStorage::new())).unwrap())
    }

    fn row(id: i64, text: &str) -> Bytes {
        Bytes::from(encode_record(&[Value::Int(id), Value::from(text)]))
    }

    fn scan_program(root: PageNo) -> Program {
        vec![
            Instr::new(Op::OpenRead, 0, root as i64, 0),
            Instr::new(Op::Rewind, 0, 5, 0),
            Instr::new(Op::Column, 0, -1, 0),
            Instr::new(Op::ResultRow, 0, 0, 0),
            Instr::new(Op::Next, 0, 2, 0),
            Instr::halt(),
        ]
    }

    #[test]
    fn test_registers_without_database() {
        let mut vm = Vm::new();
        assert!(!vm.is_bound());
        vm.run(&[
            Instr::new(Op::Integer, 42, 0, 0),
            Instr::new(Op::Integer, -1, 2, 0),
            Instr::new(Op::ResultRow, 0, 3, 0),
            Instr::halt(),
        ])
        .unwrap();

        // Register 1 was never written and comes out as the default value.
        assert_eq!(
            vm.results(),
            &[vec![Value::Int(42), Value::Int(0), Value::Int(-1)]]
        );
    }

    #[test]
    fn test_unbound_machine_fails_safely() {
        let mut vm = Vm::new();

        let err = vm.run(&[Instr::new(Op::Column, 3, 0, 0)]).unwrap_err();
        assert!(matches!(err, VmError::CursorNotOpen(3)));

        let err = vm.run(&[Instr::new(Op::OpenRead, 0, 2, 0)]).unwrap_err();
        assert!(matches!(err, VmError::NoEnvironment));

        let err = vm
            .run(&[Instr::new(Op::Insert, 2, 0, 0).with_p4(row(1, "x"))])
            .unwrap_err();
        assert!(matches!(err, VmError::NoEnvironment));
    }

    #[test]
    fn test_seek_on_unwritten_register() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        let err = vm
            .run(&[
                Instr::new(Op::OpenRead, 0, root as i64, 0),
                Instr::new(Op::SeekGE, 0, 3, 7),
            ])
            .unwrap_err();
        assert!(matches!(err, VmError::UninitializedRegister(7)));
    }

    #[test]
    fn test_empty_program_and_fall_off_end() {
        let mut vm = Vm::new();
        vm.run(&[]).unwrap();
        assert!(vm.results().is_empty());

        // No Halt: the end of the program stops execution.
        vm.run(&[Instr::new(Op::Integer, 1, 0, 0), Instr::new(Op::ResultRow, 0, 1, 0)])
            .unwrap();
        assert_eq!(vm.results().len(), 1);
    }

    #[test]
    fn test_halt_stops_before_later_instructions() {
        let mut vm = Vm::new();
        vm.run(&[
            Instr::new(Op::Integer, 1, 0, 0),
            Instr::halt(),
            Instr::new(Op::ResultRow, 0, 1, 0),
        ])
        .unwrap();
        assert!(vm.results().is_empty());
    }

    #[test]
    fn test_negative_jump_is_an_error() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        let err = vm
            .run(&[
                Instr::new(Op::OpenRead, 0, root as i64, 0),
                Instr::new(Op::Rewind, 0, -4, 0),
            ])
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidJump(-4)));
    }

    #[test]
    fn test_insert_then_scan() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        vm.run(&[
            Instr::new(Op::Insert, root as i64, 0, 0).with_p4(row(1, "a")),
            Instr::new(Op::Insert, root as i64, 0, 0).with_p4(row(2, "b")),
            Instr::halt(),
        ])
        .unwrap();
        assert!(vm.results().is_empty());

        vm.run(&scan_program(root)).unwrap();
        assert_eq!(
            vm.results(),
            &[
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
            ]
        );
    }

    #[test]
    fn test_rewind_on_empty_table_jumps() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        vm.run(&scan_program(root)).unwrap();
        assert!(vm.results().is_empty());
    }

    #[test]
    fn test_seek_ge_exact_and_miss() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        for id in [1, 2, 3] {
            tree.insert(root, id, &row(id * 10, "v")).unwrap();
        }
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        let lookup = |key: i64| {
            vec![
                Instr::new(Op::OpenRead, 0, root as i64, 0),
                Instr::new(Op::Integer, key, 0, 0),
                Instr::new(Op::SeekGE, 0, 5, 0),
                Instr::new(Op::Column, 0, 0, 1),
                Instr::new(Op::ResultRow, 1, 1, 0),
                Instr::halt(),
            ]
        };

        vm.run(&lookup(2)).unwrap();
        assert_eq!(vm.results(), &[vec![Value::Int(20)]]);

        vm.run(&lookup(9)).unwrap();
        assert!(vm.results().is_empty());
    }

    #[test]
    fn test_column_past_row_width_is_default() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        tree.insert(root, 1, &row(5, "five")).unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        vm.run(&[
            Instr::new(Op::OpenRead, 0, root as i64, 0),
            Instr::new(Op::Rewind, 0, 5, 0),
            Instr::new(Op::Column, 0, 1, 0),
            Instr::new(Op::Column, 0, 9, 1),
            Instr::new(Op::ResultRow, 0, 2, 0),
            Instr::halt(),
        ])
        .unwrap();
        assert_eq!(vm.results(), &[vec![Value::from("five"), Value::Int(0)]]);
    }

    #[test]
    fn test_open_by_table_name() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        tree.insert(root, 1, &row(1, "x")).unwrap();
        let catalog: HashMap<String, PageNo> = [("t".to_string(), root)].into_iter().collect();
        let mut vm = Vm::bound(&mut tree, &catalog);

        let mut program = scan_program(0);
        program[0] = Instr::new(Op::OpenRead, 0, 0, 0).with_p4("t");
        vm.run(&program).unwrap();
        assert_eq!(vm.results().len(), 1);

        program[0] = Instr::new(Op::OpenRead, 0, 0, 0).with_p4("missing");
        assert!(matches!(vm.run(&program), Err(VmError::NoSuchTable(name)) if name == "missing"));
    }

    #[test]
    fn test_unallocated_root_fails_without_side_effects() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let pages = tree.pager().page_count();
        let catalog: HashMap<String, PageNo> = HashMap::new();

        {
            let mut vm = Vm::bound(&mut tree, &catalog);
            for bogus in [i64::from(u32::MAX), 100_000] {
                let err = vm
                    .run(&[
                        Instr::new(Op::OpenRead, 0, bogus, 0),
                        Instr::new(Op::Rewind, 0, 9, 0),
                    ])
                    .unwrap_err();
                assert!(matches!(err, VmError::Storage(_)));

                let err = vm
                    .run(&[Instr::new(Op::Insert, bogus, 0, 0).with_p4(row(1, "x"))])
                    .unwrap_err();
                assert!(matches!(err, VmError::Storage(_)));
            }
        }

        assert_eq!(tree.pager().page_count(), pages);
        assert_eq!(tree.create_table().unwrap(), root + 1);
    }

    #[test]
    fn test_column_on_exhausted_cursor() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();
        let mut vm = Vm::bound(&mut tree, &catalog);

        let err = vm
            .run(&[
                Instr::new(Op::OpenRead, 0, root as i64, 0),
                Instr::new(Op::Column, 0, -1, 0),
            ])
            .unwrap_err();
        assert!(matches!(err, VmError::CursorNotPositioned(0)));
    }

    #[test]
    fn test_rowids_continue_after_existing_rows() {
        let mut tree = memory_tree();
        let root = tree.create_table().unwrap();
        tree.insert(root, 41, &row(0, "old")).unwrap();
        let catalog: HashMap<String, PageNo> = HashMap::new();

        {
            let mut vm = Vm::bound(&mut tree, &catalog);
            vm.run(&[Instr::new(Op::Insert, root as i64, 0, 0).with_p4(row(1, "new"))])
                .unwrap();
        }
        assert_eq!(tree.max_rowid(root).unwrap(), Some(42));
    }

    #[test]
    fn test_bad_operands() {
        let mut vm = Vm::new();
        assert!(matches!(
            vm.run(&[Instr::new(Op::Integer, 1, -1, 0)]),
            Err(VmError::InvalidOperand { op: Op::Integer, value: -1 })
        ));
        assert!(matches!(
            vm.run(&[Instr::new(Op::ResultRow, 0, -2, 0)]),
            Err(VmError::InvalidOperand { op: Op::ResultRow, .. })
        ));
    }

    #[test]
    fn test_instr_display() {
        let instr = Instr::new(Op::Insert, 2, 0, 0).with_p4(vec![1u8, 2, 3]);
        assert_eq!(instr.to_string(), "Insert        2    0    0 [3 bytes]");
    }
}
