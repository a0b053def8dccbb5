pub mod handlers;
pub mod models;
pub mod payload;
pub mod routes;
pub mod stream;
