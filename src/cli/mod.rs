mod app;
pub mod check_path;
pub mod commands;
pub mod config;
pub mod context;
mod dispatch;
pub mod env;
pub mod output;
pub mod probe;
pub mod run;
pub mod runtime;

pub use app::run;
pub use env::CliArgs;
