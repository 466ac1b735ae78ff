mod fonts;
mod poi;
mod server;
mod tasks;
mod tiles;

pub use server::{map_internal_error, new_server, router};
pub use tasks::{MergeRequest, TaskCreated};
