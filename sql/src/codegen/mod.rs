//! Lowers parsed statements to VM programs.

use crate::catalog::Catalog;
use crate::parser::{Projection, Statement};
use crate::vm::{Instr, Op, Program};
use crate::{Error, Result};
use minidb_core::TableSchema;
use storage::encode_record;

pub fn codegen(stmt: &Statement, catalog: &Catalog) -> Result<Program> {
    match stmt {
        // Table creation goes through the catalog directly.
        Statement::Create { .. } => Ok(vec![Instr::halt()]),

        Statement::Insert { table, values } => {
            let schema = lookup(catalog, table)?;
            if values.len() != schema.columns.len() {
                return Err(Error::ArityMismatch {
                    table: schema.name.clone(),
                    expected: schema.columns.len(),
                    found: values.len(),
                });
            }
            schema.validate_row(values).map_err(Error::InvalidRow)?;

            let record = encode_record(values);
            Ok(vec![
                Instr::new(Op::Insert, i64::from(schema.root_page), 0, 0).with_p4(record),
                Instr::halt(),
            ])
        }

        Statement::Select {
            table,
            projection,
            rowid,
        } => {
            let schema = lookup(catalog, table)?;
            let mut program = vec![Instr::new(Op::OpenRead, 0, i64::from(schema.root_page), 0)];

            // Patched to the final Halt once its address is known.
            let exit_jump = match rowid {
                Some(key) => {
                    program.push(Instr::new(Op::Integer, *key, 0, 0));
                    program.push(Instr::new(Op::SeekGE, 0, 0, 0));
                    program.len() - 1
                }
                None => {
                    program.push(Instr::new(Op::Rewind, 0, 0, 0));
                    program.len() - 1
                }
            };

            let loop_start = program.len() as i64;
            match projection {
                Projection::All => {
                    program.push(Instr::new(Op::Column, 0, -1, 0));
                    program.push(Instr::new(Op::ResultRow, 0, 0, 0));
                }
                Projection::Columns(names) => {
                    for (reg, name) in names.iter().enumerate() {
                        let column =
                            schema
                                .column_index(name)
                                .ok_or_else(|| Error::NoSuchColumn {
                                    table: schema.name.clone(),
                                    column: name.clone(),
                                })?;
                        program.push(Instr::new(Op::Column, 0, column as i64, reg as i64));
                    }
                    program.push(Instr::new(Op::ResultRow, 0, names.len() as i64, 0));
                }
            }

            if rowid.is_none() {
                program.push(Instr::new(Op::Next, 0, loop_start, 0));
            }
            program.push(Instr::halt());
            program[exit_jump].p2 = program.len() as i64 - 1;

            Ok(program)
        }
    }
}

fn lookup<'a>(catalog: &'a Catalog, table: &str) -> Result<&'a TableSchema> {
    catalog
        .lookup(table)
        .ok_or_else(|| Error::NoSuchTable(table.to_string()))
}
