mod app;
mod config;
mod input;
mod logging;
mod presenter;
mod save;

pub use app::run_app;
