pub mod app;
pub mod config;
pub mod console;

pub use app::run;
pub use config::AppConfig;
