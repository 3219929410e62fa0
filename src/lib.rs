//! # chatrag: document-grounded chat
//!
//! Ingests documents into a local SQLite + sqlite-vec index and answers
//! multi-turn chat questions against it, recording token usage for every
//! answer.
//!
//! ## Architecture
//!
//! - **[`loader`]**: extension-based text extraction (PDF, text, DOCX, spreadsheets)
//! - **[`indexer`]**: recursive chunker and the load → chunk → embed → index pipeline
//! - **[`embedder`]**: embedding providers (OpenAI-compatible, deterministic mock)
//! - **[`db`]**: vector index, file records, sessions and messages
//! - **[`history`]**: turn reconstruction from stored messages
//! - **[`generator`]**: chat-completions provider and prompt
//! - **[`chat`]**: retrieval-augmented answering with usage accounting
//! - **[`mcp`]**: MCP tools over stdio (rmcp)

pub mod blocking;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod history;
pub mod indexer;
pub mod loader;
pub mod mcp;
pub mod uploads;
