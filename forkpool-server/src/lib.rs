//! # forkpool
//!
//! Multi-process HTTP service. A primary process supervises a pool of
//! worker processes (one per spare core), keeps each one running on a fixed
//! port, and proxies every `/api` request to one of them. Each worker serves
//! an in-memory user CRUD API.

pub mod infra;
pub mod pool;
pub mod primary;
pub mod proxy;
pub mod routes;
pub mod users;
pub mod worker;
