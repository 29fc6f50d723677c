//! # imgpress
//!
//! Upload post-processing for JPEG/PNG media libraries. Every time an image
//! is uploaded or regenerated, imgpress works out *why* the attached file
//! looks the way it does, applies the one transform that fits, produces the
//! requested sizes, and keeps a WebP clone beside every file.
//!
//! # Architecture: One Pass, Three Steps
//!
//! A host (the [`library`] module is the reference one) drives records
//! through the [`pipeline`] hooks. Each pass runs:
//!
//! ```text
//! 1. Classify   snapshot + names + mime  →  ImageState
//! 2. Dispatch   ImageState               →  recompress / skip / clone
//! 3. Subsizes   thumbnails source        →  sizes + clones, saved per size
//! ```
//!
//! Any failure aborts the pass and hands the host its own input back. A
//! failed pass is always safe to retry: nothing half-written is ever attached.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`classify`] | Image state classifier: edited, scaled, rotated, lossless, lossy |
//! | [`dispatch`] | Per-state transform: recompress in place, compress to `-scaled`, or clone only |
//! | [`subsizes`] | Size generation from the thumbnails source, persisted after each size |
//! | [`webp`] | WebP clone generator with its four policies and quality offsets |
//! | [`pipeline`] | Host-facing hooks and pass recovery |
//! | [`library`] | Directory-backed reference host used by the CLI |
//! | [`snapshot`] | Pre-regenerate metadata snapshot and editor backup sizes |
//! | [`registry`] | Tracked files for cleanup, plus the compression ledger |
//! | [`store`] | Per-record key/value store (`MetaStore`) |
//! | [`pass`] | Pass context, re-entrancy guard, time budget, pass errors |
//! | [`naming`] | Suffix grammar (`-scaled`, `-rotated`, `-eNNNNNNNNNNNNN`) and derived names |
//! | [`metadata`] | Record metadata model |
//! | [`imaging`] | Codec backend trait, production backend, pure dimension math |
//! | [`config`] | `press.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## History From Names
//!
//! The only record of what produced the attached file is its name. The
//! suffix grammar is parsed into [`naming::FileSuffix`] with an explicit
//! `Unrecognized` variant, and an unrecognized suffix stops the pass rather
//! than being coerced into the nearest state.
//!
//! ## Idempotent Recompression
//!
//! Recompressing a JPEG twice loses quality twice. The [`registry`] keeps a
//! SHA-256 ledger of the bytes each pass settled on; a file whose bytes match
//! its ledger entry is never recompressed again, so regenerating a record any
//! number of times yields the same files.
//!
//! ## Explicit Pass Context
//!
//! Writing metadata can re-trigger the host's hooks. Instead of shared
//! mutable flags, each pass carries a [`pass::PassContext`] holding the
//! re-entrancy [`pass::MetadataGuard`], the resolved mime type and state,
//! and the per-operation [`pass::TimeBudget`].

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod imaging;
pub mod library;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod subsizes;
pub mod webp;

#[cfg(test)]
pub(crate) mod test_helpers;
