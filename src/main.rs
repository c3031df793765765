use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, warn};

use stratadb::error::{DbError, DbResult};
use stratadb::sql::ast::Statement;
use stratadb::sql::parser::parse_statement;
use stratadb::storage::btree::Table;
use stratadb::storage::page::{
    CELLS_OFFSET, CHILDREN_PER_INTERNAL, COMMON_HEADER_SIZE, LEAF_HEADER_SIZE, PAGE_SIZE,
    ROWS_PER_LEAF,
};
use stratadb::storage::pager::TABLE_MAX_PAGES;
use stratadb::storage::row::ROW_SIZE;

/// Disk-backed B+ tree table engine with a minimal SQL shell.
#[derive(Parser, Debug)]
#[command(name = "stratadb", version, about)]
struct Args {
    /// Path of the database file
    #[arg(long, default_value = "db.sqlite")]
    file: PathBuf,
}

enum MetaResult {
    Continue,
    Exit,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let table = match Table::open(&args.file) {
        Ok(table) => table,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    match repl(table) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// One statement per line until `.exit` (or EOF), then flush and leave.
fn repl(mut table: Table) -> DbResult<()> {
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('.') {
            match meta_command(&mut table, trimmed) {
                Ok(MetaResult::Exit) => break,
                Ok(MetaResult::Continue) => {}
                Err(e) => report(&e),
            }
            continue;
        }

        match parse_statement(trimmed) {
            Ok(Statement::Insert { row }) => {
                debug!("insert id {}", row.id);
                if let Err(e) = table.insert_row(row) {
                    report(&e);
                }
            }
            Ok(Statement::Select) => match table.select_all() {
                Ok(rows) => {
                    for row in rows {
                        println!("{}", row);
                    }
                }
                Err(e) => report(&e),
            },
            Err(e) => report(&e),
        }
    }
    table.close()
}

fn meta_command(table: &mut Table, line: &str) -> DbResult<MetaResult> {
    match line.to_uppercase().as_str() {
        ".EXIT" => Ok(MetaResult::Exit),
        ".BTREE" => {
            print!("{}", table.dump_tree()?);
            Ok(MetaResult::Continue)
        }
        ".CONSTANTS" => {
            println!("PAGE_SIZE: {}", PAGE_SIZE);
            println!("TABLE_MAX_PAGES: {}", TABLE_MAX_PAGES);
            println!("ROW_SIZE: {}", ROW_SIZE);
            println!("COMMON_HEADER_SIZE: {}", COMMON_HEADER_SIZE);
            println!("LEAF_HEADER_SIZE: {}", LEAF_HEADER_SIZE);
            println!("CELLS_OFFSET: {}", CELLS_OFFSET);
            println!("ROWS_PER_LEAF: {}", ROWS_PER_LEAF);
            println!("CHILDREN_PER_INTERNAL: {}", CHILDREN_PER_INTERNAL);
            Ok(MetaResult::Continue)
        }
        _ => Err(DbError::InvalidStatement),
    }
}

fn report(e: &DbError) {
    warn!("statement failed: {}", e);
    eprintln!("DB error: ({}), {}", e.code(), e);
}
