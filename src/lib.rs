//! # Docent
//!
//! A retrieval-augmented chat backend for a personal portfolio and blog site.
//!
//! Docent indexes the site's markdown content (blog posts, project pages,
//! and the resume) into embedding vectors, and answers visitor questions
//! over that content through a streaming chat endpoint with retrieval,
//! intent rules, and rate limiting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Markdown   │──▶│  Pipeline   │──▶│ index.json │
//! │ posts/proj  │   │ Chunk+Embed │   │  vectors   │
//! └─────────────┘   └─────────────┘   └─────┬──────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │ (docent) │       │  (chat)  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docent index                  # embed site content into index.json
//! docent search "deploy pipeline"
//! docent stats                  # inspect what was indexed
//! docent serve                  # start the chat server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Markdown extraction and normalization |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embeddings API client and similarity |
//! | [`indexer`] | Index build pipeline |
//! | [`store`] | Index persistence and in-memory cache |
//! | [`retrieve`] | Vector ranking and lexical fallback |
//! | [`intent`] | Question intent rules |
//! | [`context`] | Prompt context assembly |
//! | [`generate`] | Streaming answer generation |
//! | [`ratelimit`] | Fixed-window rate limiting |
//! | [`server`] | Chat HTTP server |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod indexer;
pub mod intent;
pub mod models;
pub mod ratelimit;
pub mod retrieve;
pub mod server;
pub mod stats;
pub mod store;
