//! HTTP transport: request headers shared by the pool and the executor.

pub mod headers;
