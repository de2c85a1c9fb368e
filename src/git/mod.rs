//! Thin git helpers shared by the repo cache and workspace engine.
//!
//! Everything else the teacher's git module used to cover (status, diff,
//! branch/tag/stash management, high-level operations) belongs to an
//! interactive git client and has no counterpart here; only proxy detection
//! survives, since `repo_cache` needs it for its own `git2` network calls.

pub mod proxy;
