pub mod config;
pub mod data_models;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fetcher;
pub mod llm;
pub mod parser;
pub mod ports;
pub mod prompts;
pub mod robots;
pub mod search;
