pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod forecast;
pub mod occupancy;
pub mod refresh;
pub mod source;
pub mod state;
