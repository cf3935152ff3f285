//! Benchmark utilities for the rusty_pool storage core.
//!
//! - **Microbenchmarks**: tenant allocation, reuse, free and iteration; class index
//!   lookups, canonical hashing and component sorting
//! - **Churn**: a seeded create/delete workload over one tenant
//! - **Memory tracking**: heap allocation profiling via dhat
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p rusty_pool_bench
//!
//! # Run specific benchmark group
//! cargo bench -p rusty_pool_bench -- tenant
//!
//! # Run with memory profiling (slower)
//! cargo bench -p rusty_pool_bench --features memory_profiling
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.

pub mod churn;
pub mod items;
pub mod memory;
