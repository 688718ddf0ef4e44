//! Vertex submission: attribute decoding, primitive normalization and
//! canonical batch construction.

pub mod batch;
pub mod decode;
pub mod topology;
