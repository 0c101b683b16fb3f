//! Alignment primitives shared by the store, the loader and the realigner.

pub mod cigar;
pub mod config;
pub mod template_length;
