//! Cross-module scenario tests. Leaf behavior is tested next to the code;
//! these exercise whole pipelines, capture, cancellation and the
//! environment-capture monitor together.

mod buffers;
mod chaining;
mod monitor;
