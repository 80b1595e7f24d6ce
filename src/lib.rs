//! # kb-chat
//!
//! A chat gateway and CLI that can ground assistant replies in documents
//! the user uploaded to a hosted vector store.
//!
//! Conversation state lives upstream behind a continuation token, and
//! indexing is done by the provider's vector-store service. Locally, the
//! crate keeps a small registry of uploaded files, keeps every view of that
//! registry in sync through an in-process event bus, and removes files in
//! bulk while accounting for partial failure.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  events   ┌──────────────┐
//! │    Views     │◀──────────│   Registry   │──▶ BlobStore (JSON on disk)
//! │ (selection)  │  reload   │ add / clear  │
//! └──────┬───────┘──────────▶└──────┬───────┘
//!        │ scope                    │ DocumentIndex
//!        ▼                          ▼
//! ┌──────────────┐          ┌──────────────┐        ┌──────────┐
//! │ ChatSession  │─────────▶│ GatewayClient│──HTTP─▶│ Gateway  │──▶ OpenAI
//! └──────────────┘ Assistant└──────────────┘        │ (server) │
//!                  Gateway                          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=...
//! kbchat serve                    # start the gateway
//! kbchat upload notes.md faq.pdf  # index files, record them locally
//! kbchat list                     # show the local registry
//! kbchat chat                     # talk, /use <n> to ground in a store
//! kbchat clear                    # remove everything remotely and locally
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire and domain types |
//! | [`error`] | Collaborator error taxonomy |
//! | [`storage`] | Key/value blob storage |
//! | [`events`] | Registry change events and the event bus |
//! | [`registry`] | Local knowledge-base registry |
//! | [`view`] | Per-surface cached view and selection |
//! | [`upload`] | Upload tasks and batches |
//! | [`index`] | Collaborator traits |
//! | [`openai`] | OpenAI REST client |
//! | [`client`] | Gateway HTTP client |
//! | [`session`] | Conversation session |
//! | [`server`] | HTTP gateway |

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod models;
pub mod openai;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod upload;
pub mod view;
