//! Client code for offcache.
//!
//! This crate provides the HTTP fetch pipeline and the worker that sits in
//! front of it: install/activate lifecycle, stale-while-revalidate
//! interception, and the event dispatcher that ties them together.

pub mod fetch;
pub mod worker;

pub use fetch::{FetchClient, FetchConfig, Network};

pub use worker::{
    ActivateOutcome, FetchInterceptor, InstallOutcome, Intercepted, LifecycleController, ResponseSource,
    RevalidationOutcome, Worker, WorkerEvent, WorkerReply, WorkerState,
};
