pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;
