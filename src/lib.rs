pub mod bridge;
pub mod bus;
pub mod commands;
pub mod config;
pub mod routing;
pub mod runtime;
pub mod shared;
