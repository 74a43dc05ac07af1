//! Read side: what exists, inferred from stored state with no remote calls.

pub mod inferrer;
pub mod models;
