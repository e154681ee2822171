//! Per-job target spot ratio resolution.

pub mod resolver;

pub use resolver::{encode_ratio, parse_ratio, RatioResolver};
