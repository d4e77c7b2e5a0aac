//! Pipeline tests
//!
//! Drive the producer, the in-memory log and the batch consumer together:
//! - end_to_end: published records reach their handlers with ids and order intact
//! - ordering: topic groups of a batch are dispatched one after another
//! - resilience: bad records, failing handlers, rebalances and stops
//! - bootstrap: broker readiness retries and topic provisioning

mod bootstrap;
mod end_to_end;
mod ordering;
mod resilience;
mod support;
