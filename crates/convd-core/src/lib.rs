pub mod aggregator;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod formats;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod task_db;
