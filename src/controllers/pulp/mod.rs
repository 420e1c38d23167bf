pub mod controller;

pub use controller::run;

pub mod reconcilers;
pub use reconcilers::{ClusterApi, EventSink, ReconcileOutcome, Reconciler};
