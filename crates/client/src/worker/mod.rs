//! The offline cache worker: lifecycle, interception and event dispatch.

pub mod dispatch;
pub mod intercept;
pub mod lifecycle;

pub use dispatch::{Worker, WorkerEvent, WorkerReply, WorkerState};
pub use intercept::{FetchInterceptor, Intercepted, ResponseSource, Revalidation, RevalidationOutcome};
pub use lifecycle::{ActivateOutcome, DeleteFailure, InstallOutcome, LifecycleController};
