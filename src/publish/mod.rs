//! Cloud publish path.
//!
//! ```text
//!  download / drain ──acquire──▶ [ publish buffer ] ──submit──▶ worker thread
//!        ▲                                                        │
//!        └────────── PublishTicket (oneshot outcome) ◀────────────┘
//! ```
//!
//! Exactly one publish buffer exists. Holding it is the right to submit;
//! the worker hands it back after every job, whatever the outcome.

pub mod dispatcher;
pub mod topic;

pub use dispatcher::{
    CloudPort, Dispatcher, PublishOutcome, PublishPort, PublishTicket, PublishWorker, dispatcher,
};
pub use topic::Topics;
