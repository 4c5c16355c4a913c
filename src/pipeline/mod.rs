//! Pipeline stages for prescription analysis.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the extraction backend can be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ prepare ──▶ extract ──▶ normalize ──▶ validate
//!          (JPEG/b64)  (vision    (fences,       (rules)
//!                       model)     provenance)
//! ```
//!
//! 1. [`prepare`]   : decode, bound and re-encode the upload; CPU-bound, so
//!    callers run it in `spawn_blocking`
//! 2. [`extract`]   : one call to the vision model; the only stage with
//!    network I/O
//! 3. [`normalize`] : turn raw model text into a [`crate::record::PrescriptionRecord`]
//! 4. [`validate`]  : deterministic completeness checks; invoked separately
//!    from analysis

pub mod extract;
pub mod normalize;
pub mod prepare;
pub mod validate;
