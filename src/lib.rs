pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod infra;
pub mod logging;
pub mod repository;
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use http::{build_router, HttpServerState};
pub use server::{AuthServer, Stores};
