//! PLBERT text encoder loading in pure Rust.
//!
//! PLBERT is an ALBERT encoder pretrained on phoneme sequences and used as
//! the text front end of StyleTTS-style speech synthesis. This crate
//! rebuilds the architecture on candle, reads a training run's
//! `config.yml` and latest `step_<N>.t7` checkpoint, remaps the training
//! wrapper's parameter names and returns an encoder whose forward pass
//! yields the last hidden state.
//!
//! ```text
//! config.yml ── model_params ──→ AlbertConfig ──→ Plbert (fresh)
//!                                                   │
//! step_N.t7 ── net ── remap_key ── non-strict load ─┘──→ Plbert (pretrained)
//! ```
//!
//! ## Modules
//!
//! - [`config`] — `config.yml` parsing, ALBERT hyperparameters
//! - [`checkpoint`] — checkpoint discovery, key remapping, non-strict loading
//! - [`model`] — ALBERT encoder and the PLBERT wrapper
//! - [`loader`] — [`load_plbert`] and the [`PlbertLoader`] builder

pub mod checkpoint;
pub mod config;
pub mod loader;
pub mod model;

mod error;

pub use error::{Error, Result};
pub use loader::{LoadedPlbert, PlbertLoader, load_plbert};
pub use model::plbert::Plbert;
