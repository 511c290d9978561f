//! # KnowledgeForge
//!
//! A retrieval-augmented question answering service over privately
//! uploaded documents.
//!
//! Users upload documents; KnowledgeForge extracts their text, splits it
//! into overlapping chunks, embeds the chunks, and maintains one exact
//! nearest-neighbor vector index per user. Questions are answered by
//! retrieving the closest chunks and feeding them — together with recent
//! conversation history — to a language model, synchronously or as a
//! token stream over WebSocket, under per-user rate limits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Upload   │──▶│ Extract+Chunk │──▶│ Vector Index │
//! │ (HTTP)   │   │  + Embed      │   │  (per user)  │
//! └──────────┘   └───────────────┘   └──────┬───────┘
//!                                           │ search
//! ┌──────────┐   ┌───────────────┐   ┌──────▼───────┐
//! │ Question │──▶│ Rate limit +  │──▶│  Retriever   │
//! │ (HTTP/WS)│   │  validation   │   └──────┬───────┘
//! └──────────┘   └───────────────┘          │ context
//!                      ┌────────────────────▼───────┐
//!                      │ LLM orchestration          │
//!                      │ history ⇄ memory + SQLite  │
//!                      └────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Service error taxonomy |
//! | [`extract`] | Document text extraction (txt/md, PDF, DOCX) |
//! | [`chunker`] | Fixed-window overlapping page chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Per-user nearest-neighbor store |
//! | [`retriever`] | Question → ranked chunk context |
//! | [`indexer`] | Upload-side indexing pipeline |
//! | [`memory`] | Bounded in-process session memory |
//! | [`llm`] | Generation provider + answer orchestration |
//! | [`rate_limit`] | Sliding-window admission control |
//! | [`store`] | Durable store (SQLite) |
//! | [`auth`] | Bearer-token verification |
//! | [`server`] | HTTP + WebSocket API |

pub mod auth;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod llm;
pub mod memory;
pub mod models;
pub mod rate_limit;
pub mod retriever;
pub mod server;
pub mod store;
pub mod vector_index;
