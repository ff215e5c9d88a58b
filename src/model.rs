//! Model components.
//!
//! - [`albert`] — ALBERT encoder (embeddings, shared layer groups, pooler)
//! - [`plbert`] — PLBERT wrapper returning only the last hidden state

pub mod albert;
pub mod plbert;
