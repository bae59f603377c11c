//! CLI command handlers, one file per command.

mod balance;
mod grant;
mod purge;
mod status;

pub use balance::run_balance;
pub use grant::run_grant;
pub use purge::run_purge;
pub use status::run_status;
