//! Bar ingestion: file schema, streaming reader, canonicalisation,
//! minute aggregation and synthetic data.

pub mod aggregate;
pub mod canonicalize;
pub mod reader;
pub mod schema;
pub mod synthetic;

pub use aggregate::{minute_start, MinuteAggregator};
pub use canonicalize::{CanonicalizeReport, Canonicalizer};
pub use reader::{
    BarIter, BarSource, CsvBarFile, InMemoryBars, ReadMode, ScanCounts, ScanStats, SourceReadError,
    TimeRange,
};
pub use schema::{format_timestamp, parse_timestamp, BarColumns, BarSchema, SchemaError};
pub use synthetic::SyntheticSpec;
