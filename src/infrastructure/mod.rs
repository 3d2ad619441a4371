//! Infrastructure: persistence, events, connectivity and the remote API client

pub mod connectivity;
pub mod database;
pub mod events;
pub mod remote;
