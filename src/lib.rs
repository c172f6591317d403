// Library root. The console binary lives in src/main.rs.

pub mod assistant;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod health;
pub mod intent;
pub mod llm;
pub mod logger;
pub mod memory;
pub mod resources;

#[cfg(test)]
mod testutil;
