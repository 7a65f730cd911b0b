// Database module
// SQLite storage for the question/answer and medication corpora

pub mod sqlite;

pub use sqlite::*;
