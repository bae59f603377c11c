//! Task CRUD on `TaskDb`, split into read and write halves.

mod read;
mod write;
