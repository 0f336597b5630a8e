//! Specialized memory allocator for dynamic-analysis runtimes.
//!
//! A leak checker or race detector sits beside an instrumented program and
//! must serve its own bookkeeping allocations without touching the host
//! allocator. This crate provides that heap: a size-classed primary backend
//! served through per-thread caches, a map-per-allocation secondary for large
//! or unusually aligned requests, and a combined façade that dispatches
//! between them and answers pointer-identity and metadata queries.

extern crate libc;

pub mod cache;
pub mod combined;
pub mod config;
pub mod large;
pub mod list;
pub mod platform;
pub mod primary;
pub mod size_class;
pub mod sync;
pub mod util;

pub use cache::LocalCache;
pub use combined::CombinedAllocator;
pub use large::LargeMapAllocator;
pub use primary::RegionAllocator;
