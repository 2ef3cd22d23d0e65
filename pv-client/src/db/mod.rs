pub mod readings_queries;

pub use readings_queries::{HistoryFilter, ReadingRow, ReadingStatistics, RowDecodeError, READINGS_TABLE};
