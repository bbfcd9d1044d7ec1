//! I/O module
//!
//! Handles CSV script parsing and report output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (command conversion, output serialization)
//! - `async_reader` - Asynchronous CSV reader with batch reading interface

pub mod async_reader;
pub mod csv_format;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_csv_record, write_cards_csv, write_statement_csv, CsvRecord, LedgerCommand,
};
