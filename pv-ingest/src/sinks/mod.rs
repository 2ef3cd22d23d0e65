pub mod sqlite_history;

pub use sqlite_history::HistoryStore;
