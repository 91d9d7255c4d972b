pub mod config;
pub mod error;
pub mod evaluation;
pub mod indexer;
pub mod logger;
pub mod models;
pub mod proxy;
pub mod rag;
pub mod responder;
pub mod retry;
pub mod server;

#[cfg(test)]
mod testing;
