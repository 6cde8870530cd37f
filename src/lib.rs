pub mod browser_ai;
pub mod config;
pub mod course;
pub mod crawl;
pub mod error;
pub mod llm;
pub mod models;
pub mod recommend;
pub mod run;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::JobsScout;
