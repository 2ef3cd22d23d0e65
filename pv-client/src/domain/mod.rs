mod reading;

pub use reading::{
    format_stored_ts, parse_stored_ts, DataSource, ProductionPoint, Reading, UnknownDataSource, STORED_TS_FORMAT,
};
