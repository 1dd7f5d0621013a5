//! Tails a web-server access log and checkpoints aggregated counters
//! together with the read offset, in Redis or a local JSON document.

mod accesslog;
mod counter;
mod date;
mod error;
pub mod json_store;
pub mod redis_store;
mod storage;
pub mod tail;
mod worker;

pub use accesslog::{parse_extra, parse_line, AccessLogRecord, ParseError};
pub use counter::{Accumulator, Aggregator, CounterSet};
pub use date::{parse_date, DateError};
pub use error::Error;
pub use json_store::JsonStorage;
pub use redis_store::RedisStorage;
pub use storage::{Storage, StorageError};
pub use tail::{Cursor, LogTailer, TailEvent};
pub use worker::{run, Worker, WorkerBuilder, DEFAULT_FLUSH_INTERVAL};
