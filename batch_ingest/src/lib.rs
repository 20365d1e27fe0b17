//! Batching ingestion from a publish/subscribe bus into bulk-write handlers.
//!
//! Messages received on a subject are pushed into a bounded queue shared by a
//! fixed pool of workers. Each worker owns a batcher that flushes its batch
//! once it grows past the configured size, or on every tick of the flush
//! interval, and hands the batch to a [`BatchHandler`](pipeline::handlers::BatchHandler)
//! on its own task.

pub mod clients;
pub mod config;
pub mod conversions;
pub mod message;
pub mod pipeline;
