//! Database handle and line-oriented session on top of it.

use crate::catalog::Catalog;
use crate::codegen::codegen;
use crate::parser::{parse, Statement};
use crate::vm::{Row, Vm};
use crate::{Error, Result};
use std::path::Path;
use storage::{BTree, FileStorage, MemoryStorage, Pager, Storage};

/// Result of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(String),
    Inserted,
    Rows(Vec<Row>),
}

/// An open database: the B-tree over its pager, plus the catalog.
pub struct Database {
    btree: BTree,
    catalog: Catalog,
    auto_flush: bool,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("opening database {}", path.display());
        Self::from_storage(Box::new(FileStorage::open(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_storage(Box::new(MemoryStorage::new()))
    }

    pub fn from_storage(storage: Box<dyn Storage>) -> Result<Self> {
        let mut btree = BTree::new(Pager::new(storage)?);
        let catalog = Catalog::load(&mut btree)?;
        Ok(Self {
            btree,
            catalog,
            auto_flush: true,
        })
    }

    /// Whether every successful statement is followed by a flush.
    pub fn set_auto_flush(&mut self, auto_flush: bool) {
        self.auto_flush = auto_flush;
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn btree(&self) -> &BTree {
        &self.btree
    }

    pub fn execute(&mut self, sql: &str) -> Result<Outcome> {
        let stmt = parse(sql)?;
        self.execute_statement(&stmt)
    }

    pub fn execute_statement(&mut self, stmt: &Statement) -> Result<Outcome> {
        let outcome = match stmt {
            Statement::Create { table, columns } => {
                let schema = self
                    .catalog
                    .create_table(&mut self.btree, table, columns.clone())?;
                Outcome::Created(schema.name.clone())
            }
            Statement::Insert { .. } | Statement::Select { .. } => {
                let program = codegen(stmt, &self.catalog)?;
                let mut vm = Vm::bound(&mut self.btree, &self.catalog);
                vm.run(&program)?;
                match stmt {
                    Statement::Select { .. } => Outcome::Rows(vm.take_results()),
                    _ => Outcome::Inserted,
                }
            }
        };

        if self.auto_flush {
            self.flush()?;
        }
        Ok(outcome)
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.btree.flush()?)
    }

    /// Runs the structural checker over the schema table and every user
    /// table, returning `(name, ok)` pairs.
    pub fn check_all(&mut self) -> Result<Vec<(String, bool)>> {
        let mut report = vec![(
            "schema".to_string(),
            self.btree.check(self.catalog.schema_root())?,
        )];
        let tables: Vec<_> = self
            .catalog
            .tables()
            .into_iter()
            .map(|t| (t.name.clone(), t.root_page))
            .collect();
        for (name, root) in tables {
            let ok = self.btree.check(root)?;
            report.push((name, ok));
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Text to show the user; may be empty.
    Output(String),
    Quit,
}

/// Interprets input lines: dot-commands plus SQL against the open database.
pub struct Session {
    db: Option<Database>,
    auto_flush: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            db: None,
            auto_flush: true,
        }
    }

    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    pub fn database(&mut self) -> Option<&mut Database> {
        self.db.as_mut()
    }

    /// Replaces the open database with the one at `path`.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut db = Database::open(path)?;
        db.set_auto_flush(self.auto_flush);
        self.attach(db)
    }

    pub fn attach(&mut self, db: Database) -> Result<()> {
        if let Some(mut old) = self.db.replace(db) {
            old.flush()?;
        }
        Ok(())
    }

    /// Flushes the open database, if any.
    pub fn close(&mut self) -> Result<()> {
        match self.db.take() {
            Some(mut db) => db.flush(),
            None => Ok(()),
        }
    }

    pub fn handle_line(&mut self, line: &str) -> Result<Response> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Response::Output(String::new()));
        }
        if line.starts_with('.') {
            return self.handle_command(line);
        }

        let db = self.db.as_mut().ok_or(Error::NoDatabase)?;
        let output = match db.execute(line)? {
            Outcome::Created(_) => "ok\n".to_string(),
            Outcome::Inserted => String::new(),
            Outcome::Rows(rows) => format_rows(&rows),
        };
        Ok(Response::Output(output))
    }

    fn handle_command(&mut self, line: &str) -> Result<Response> {
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        let mut out = String::new();
        match command {
            ".quit" | ".exit" => return Ok(Response::Quit),
            ".open" => {
                if arg.is_empty() {
                    return Err(Error::Parse("usage: .open FILE".to_string()));
                }
                self.open(arg)?;
            }
            ".schema" => {
                let db = self.db.as_ref().ok_or(Error::NoDatabase)?;
                for table in db.catalog().tables() {
                    out.push_str(&format!("{};\n", table));
                }
            }
            ".tables" => {
                let db = self.db.as_ref().ok_or(Error::NoDatabase)?;
                for table in db.catalog().tables() {
                    out.push_str(&format!("{}\n", table.name));
                }
            }
            ".check" => {
                let db = self.db.as_mut().ok_or(Error::NoDatabase)?;
                for (name, ok) in db.check_all()? {
                    out.push_str(&format!("{}: {}\n", name, if ok { "ok" } else { "CORRUPT" }));
                }
            }
            ".flush" => {
                self.db.as_mut().ok_or(Error::NoDatabase)?.flush()?;
            }
            other => return Err(Error::UnknownCommand(other.to_string())),
        }
        Ok(Response::Output(out))
    }
}

/// One line per row, values separated by `|`.
pub fn format_rows(rows: &[Row]) -> String {
    let mut out = String::new();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            out.push_str(&value.to_string());
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use minidb_core::Value;
    use pretty_assertions::assert_eq;

    fn memory_session() -> Session {
        let mut session = Session::new();
        session.attach(Database::in_memory().unwrap()).unwrap();
        session
    }

    fn output(session: &mut Session, line: &str) -> String {
        match session.handle_line(line).unwrap() {
            Response::Output(text) => text,
            Response::Quit => panic!("unexpected quit for {:?}", line),
        }
    }

    #[test]
    fn test_sql_without_database() {
        let mut session = Session::new();
        assert!(matches!(
            session.handle_line("SELECT * FROM t"),
            Err(Error::NoDatabase)
        ));
        assert!(matches!(session.handle_line(".tables"), Err(Error::NoDatabase)));
    }

    #[test]
    fn test_session_round_trip() {
        let mut session = memory_session();
        assert_eq!(output(&mut session, "CREATE TABLE t(id INT, name TEXT)"), "ok\n");
        assert_eq!(output(&mut session, "INSERT INTO t VALUES (1, 'a')"), "");
        assert_eq!(output(&mut session, "INSERT INTO t VALUES (2, 'b')"), "");
        assert_eq!(output(&mut session, "SELECT * FROM t"), "1|a\n2|b\n");
        assert_eq!(output(&mut session, "SELECT name FROM t WHERE rowid = 2"), "b\n");
        assert_eq!(output(&mut session, ""), "");
    }

    #[test]
    fn test_dot_commands() {
        let mut session = memory_session();
        output(&mut session, "CREATE TABLE b(x TEXT)");
        output(&mut session, "CREATE TABLE a(id INT, name TEXT)");

        assert_eq!(output(&mut session, ".tables"), "a\nb\n");
        assert_eq!(
            output(&mut session, ".schema"),
            "CREATE TABLE a(id INT, name TEXT);\nCREATE TABLE b(x TEXT);\n"
        );
        assert_eq!(output(&mut session, ".check"), "schema: ok\na: ok\nb: ok\n");
        assert_eq!(output(&mut session, ".flush"), "");
        assert!(matches!(
            session.handle_line(".bogus"),
            Err(Error::UnknownCommand(cmd)) if cmd == ".bogus"
        ));
        assert_eq!(session.handle_line(".exit").unwrap(), Response::Quit);
        assert_eq!(session.handle_line("  .quit  ").unwrap(), Response::Quit);
    }

    #[test]
    fn test_errors_leave_session_usable() {
        let mut session = memory_session();
        output(&mut session, "CREATE TABLE t(id INT)");
        assert!(session.handle_line("SELEC * FROM t").is_err());
        assert!(matches!(
            session.handle_line("CREATE TABLE t(id INT)"),
            Err(Error::TableExists(_))
        ));
        assert_eq!(output(&mut session, "INSERT INTO t VALUES (5)"), "");
        assert_eq!(output(&mut session, "SELECT * FROM t"), "5\n");
    }

    #[test]
    fn test_oversized_create_table_keeps_file_size() {
        let mut session = memory_session();
        output(&mut session, "CREATE TABLE a(id INT)");
        let pages = session.database().unwrap().btree().pager().page_count();

        let columns: Vec<_> = (0..300).map(|i| format!("c{} TEXT", i)).collect();
        let sql = format!("CREATE TABLE wide({})", columns.join(", "));
        assert!(matches!(session.handle_line(&sql), Err(Error::InvalidRow(_))));

        let db = session.database().unwrap();
        assert_eq!(db.btree().pager().page_count(), pages);
        assert!(db.catalog().lookup("wide").is_none());
        assert_eq!(output(&mut session, ".check"), "schema: ok\na: ok\n");
        output(&mut session, "CREATE TABLE b(x TEXT)");
        assert_eq!(session.database().unwrap().catalog().lookup("b").unwrap().root_page, pages + 1);
    }

    #[test]
    fn test_format_rows() {
        let rows = vec![
            vec![Value::Int(-1), Value::from("x")],
            vec![Value::Text(vec![0xff, 0x00])],
        ];
        assert_eq!(format_rows(&rows), "-1|x\nx'ff00'\n");
    }
}
