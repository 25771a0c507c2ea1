pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod tutor;
