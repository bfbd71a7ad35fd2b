//! Cross-crate integration tests for the tauspread workspace.
//!
//! The library target is intentionally empty; see `tests/` for the
//! end-to-end scenarios spanning connectome construction through staging.
