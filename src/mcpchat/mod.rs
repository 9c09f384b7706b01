// src/mcpchat/mod.rs

pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod event;
pub mod mcp_client;
pub mod model_gateway;
pub mod orchestration;
pub mod tool_protocol;
pub mod tool_protocols;
pub mod tools;
pub mod transcript;

// Let's explicitly export ChatSession so it can be reached as mcpchat::ChatSession
pub use orchestration::ChatSession;
