//! Persistent table catalog.
//!
//! The catalog is itself a table. Its root page lives in the file header,
//! and each row is a record `(name TEXT, root INT, columns TEXT)` where
//! `columns` is the JSON-encoded column list.

use crate::vm::TableLookup;
use crate::{Error, Result};
use minidb_core::{ColumnDefinition, PageNo, TableSchema, Value};
use std::collections::HashMap;
use storage::{decode_record, encode_record, BTree, MAX_PAYLOAD_SIZE};

#[derive(Debug, Clone)]
pub struct Catalog {
    schema_root: PageNo,
    /// Keyed by lowercased table name.
    tables: HashMap<String, TableSchema>,
}

impl Catalog {
    /// Reads every table definition from the schema table, creating the
    /// schema table first if the database has none.
    pub fn load(btree: &mut BTree) -> Result<Self> {
        let mut schema_root = btree.pager().schema_root();
        if schema_root == 0 {
            schema_root = btree.create_table()?;
            btree.pager_mut().set_schema_root(schema_root)?;
            log::debug!("created schema table at page {}", schema_root);
        }

        let mut tables = HashMap::new();
        let mut cursor = btree.open(schema_root);
        btree.seek(&mut cursor, i64::MIN)?;
        while let Some(payload) = btree.read_payload(&cursor)? {
            let schema = schema_from_record(&payload)?;
            tables.insert(schema.name.to_ascii_lowercase(), schema);
            if !btree.next(&mut cursor)? {
                break;
            }
        }

        log::debug!("loaded {} table definitions", tables.len());
        Ok(Self {
            schema_root,
            tables,
        })
    }

    pub fn schema_root(&self) -> PageNo {
        self.schema_root
    }

    pub fn lookup(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    /// All tables, sorted by name.
    pub fn tables(&self) -> Vec<&TableSchema> {
        let mut tables: Vec<_> = self.tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Allocates a root page for `name` and records it in the schema table.
    pub fn create_table(
        &mut self,
        btree: &mut BTree,
        name: &str,
        columns: Vec<ColumnDefinition>,
    ) -> Result<&TableSchema> {
        let key = name.to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            return Err(Error::TableExists(name.to_string()));
        }

        // Everything that can fail runs before the root page is allocated,
        // so a rejected table leaves no orphan page behind.
        let columns_json = serde_json::to_string(&columns)?;
        let widest = schema_record(name, PageNo::MAX, &columns_json);
        if widest.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidRow(format!(
                "definition of table {} takes {} bytes, at most {} fit in a schema row",
                name,
                widest.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        let rowid = match btree.max_rowid(self.schema_root)? {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| Error::CorruptSchema("schema row ids exhausted".to_string()))?,
            None => 1,
        };

        let root = btree.create_table()?;
        btree.insert(self.schema_root, rowid, &schema_record(name, root, &columns_json))?;
        let schema = TableSchema {
            name: name.to_string(),
            root_page: root,
            columns,
        };

        log::debug!("created table {} with root page {}", name, root);
        Ok(self.tables.entry(key).or_insert(schema))
    }
}

impl TableLookup for Catalog {
    fn root_page(&self, name: &str) -> Option<PageNo> {
        self.lookup(name).map(|schema| schema.root_page)
    }
}

fn schema_record(name: &str, root: PageNo, columns_json: &str) -> Vec<u8> {
    encode_record(&[
        Value::from(name),
        Value::Int(i64::from(root)),
        Value::from(columns_json),
    ])
}

fn schema_from_record(payload: &[u8]) -> Result<TableSchema> {
    let values = decode_record(payload)?;
    let [name, root, columns] = values.as_slice() else {
        return Err(Error::CorruptSchema(format!(
            "schema row has {} columns, expected 3",
            values.len()
        )));
    };

    let name = match name {
        Value::Text(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| Error::CorruptSchema("table name is not UTF-8".to_string()))?,
        Value::Int(_) => return Err(Error::CorruptSchema("table name is not text".to_string())),
    };
    let root_page = root
        .as_int()
        .and_then(|root| PageNo::try_from(root).ok())
        .filter(|&root| root > 1)
        .ok_or_else(|| Error::CorruptSchema(format!("bad root page for table {}", name)))?;
    let columns = columns
        .as_bytes()
        .ok_or_else(|| Error::CorruptSchema(format!("bad column list for table {}", name)))?;
    let columns: Vec<ColumnDefinition> = serde_json::from_slice(columns)?;

    Ok(TableSchema {
        name,
        root_page,
        columns,
    })
}
