//! Per-photo stages of case processing.
//!
//! ```text
//! extract ──▶ fetch ──▶ transcode ──▶ keys ──▶ (primary store)
//!  (HTML)     (HTTP)    (resize/JPEG)  (path)
//! ```
//!
//! 1. [`extract`]: scan a case's stored HTML for photo URLs
//! 2. [`fetch`]: download the source bytes of one URL
//! 3. [`transcode`]: bound, flatten and re-encode; runs on the blocking pool
//! 4. [`keys`]: derive the deterministic storage key for the result
//!
//! Each stage fails per photo with an [`crate::error::ImageError`]. Stitching
//! stages together, storing objects and writing the ledger is the
//! scheduler's job.

pub mod extract;
pub mod fetch;
pub mod keys;
pub mod transcode;
