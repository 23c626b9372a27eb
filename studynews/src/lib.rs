// Library interface for studynews modules
// This allows tests and the binary to import modules

pub mod actions;
pub mod flow;
pub mod llm;
pub mod scraping;
pub mod search;
pub mod server;
pub mod tools;
pub mod validation;

pub use validation::{ArticleUrl, ValidationError};
