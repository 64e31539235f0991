//! Built-in agents and the registry that dispatches them.
//!
//! Each agent is a self-contained operation behind the [`Agent`] trait.
//! The [`registry::AgentRegistry`] maps agent-kind names to implementations
//! plus their display metadata and JSON schemas, and implements the
//! engine-facing `AgentInvoker` trait: timing, default timeout, and
//! cancellation wrapping happen once, in the registry.
//!
//! External services sit behind traits so every agent is testable without
//! the network: [`llm::LlmBackend`] for the text generator and
//! [`email_sender::MailTransport`] for SMTP.

pub mod api_caller;
pub mod code_analyzer;
pub mod data_processor;
pub mod database_query;
pub mod email_sender;
pub mod file_handler;
pub mod llm;
pub mod registry;
pub mod text_generator;

pub use registry::{Agent, AgentDescriptor, AgentRegistry, BuiltinServices};
