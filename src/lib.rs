//! # rust_flat_db - A Teaching-Scale Relational Database in Rust
//!
//! A small relational engine that keeps every table in a human-readable
//! text file:
//! - **Flat table files**: a metadata comment, a schema block and one line per row
//! - **SQL Support**: CREATE/DROP/ALTER, INSERT, SELECT with WHERE, UPDATE, DELETE
//! - **Joins**: nested-loop equality joins, inner and outer
//! - **Transactions**: per-table locks backed by snapshot files
//!
//! ## Architecture Overview
//!
//! 1. **Shell Layer** (`shell` module): reads statements and prints responses
//! 2. **SQL Layer** (`sql` module): parses statements and tracks the session
//! 3. **Engine Layer** (`engine` module): tables, predicates, joins, locks and files
//!
//! ## Usage Example
//!
//! ```bash
//! cargo run -- --data ./dbdata <<'EOF'
//! CREATE DATABASE db_1;
//! USE db_1;
//! CREATE TABLE t (a int, b varchar(10));
//! INSERT INTO t VALUES (1, 'x');
//! SELECT * FROM t;
//! .EXIT
//! EOF
//! ```

/// Engine configuration loaded from JSON
pub mod config;

/// Error taxonomy shared by every engine operation
pub mod error;

/// Table files, predicates, mutations, joins and locks
pub mod engine;

/// SQL parsing, dispatch and transaction sessions
pub mod sql;

/// Line-oriented statement loop
pub mod shell;
