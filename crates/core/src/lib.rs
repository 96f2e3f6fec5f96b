//! Domain model and pure analysis logic for the dermalens inference service.
//!
//! Nothing in this crate performs I/O. Detector payloads, request and job
//! models, the metric calculators applied to raw detector output, and the
//! image-reference policy all live here so that every other crate shares
//! one vocabulary.

pub mod acne;
pub mod detection;
pub mod error;
pub mod image_source;
pub mod inference;
pub mod redness;
pub mod scaling;
pub mod types;
pub mod wrinkles;
