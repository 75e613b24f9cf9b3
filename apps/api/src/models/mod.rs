pub mod connection;
pub mod conversation;
pub mod schema;
