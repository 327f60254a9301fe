//! SQL front end and bytecode interpreter for minidb.
//!
//! Statements are parsed into [`Statement`], compiled by [`codegen`] into a
//! linear [`Program`], and executed by the [`Vm`] against a
//! [`storage::BTree`]. Table roots are resolved through the persistent
//! [`Catalog`].

pub mod catalog;
pub mod codegen;
pub mod parser;
pub mod session;
pub mod vm;

pub use catalog::Catalog;
pub use codegen::codegen;
pub use parser::{parse, Projection, Statement};
pub use session::{Database, Outcome, Response, Session};
pub use vm::{Instr, Op, Program, Row, TableLookup, Vm, VmError};

use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    #[error("No such column: {column} in table {table}")]
    NoSuchColumn { table: String, column: String },

    #[error("Table {table} has {expected} columns but {found} values were supplied")]
    ArityMismatch {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Corrupt schema entry: {0}")]
    CorruptSchema(String),

    #[error("No database open (use .open FILE)")]
    NoDatabase,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Execution failed: {0}")]
    Vm(#[from] VmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Schema encoding error: {0}")]
    Schema(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
