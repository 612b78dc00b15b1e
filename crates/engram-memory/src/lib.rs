//! `engram-memory` – the tiered memory substrate.
//!
//! Persists conversational state to a local SQLite database, split into three
//! independently clearable stores:
//!
//! - [`episodic`] – [`EpisodicStore`][episodic::EpisodicStore]: short-term,
//!   per-session ordered turn log with a FIFO length bound and TTL expiry.
//! - [`semantic`] – [`SemanticIndex`][semantic::SemanticIndex]: long-term,
//!   per-user store of embedded facts with cosine-similarity retrieval and
//!   near-duplicate rejection at insert time.
//! - [`procedural`] – [`ProceduralStore`][procedural::ProceduralStore]:
//!   per-user goal/preference records with last-write-wins conflict
//!   resolution.
//!
//! Each store opens its own connection (`open` for a file-backed database,
//! `open_in_memory` for tests) and is cheaply cloneable; clones share the
//! underlying connection.

pub mod episodic;
pub mod procedural;
pub mod semantic;
