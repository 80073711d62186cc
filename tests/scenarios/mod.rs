//! Scenario-based tests for pipeline-runner

mod caching;
mod cancellation;
mod concurrency;
mod failure_handling;
mod timeout;
