//! Integration tests for kusto-ingest.
//!
//! Every collaborator is faked in-process: the command executor and
//! streaming endpoint are scripted, blobs land in an `InMemory` object
//! store and queues in `MemoryQueueStore`. Time-dependent tests run on a
//! paused clock so backoff sleeps and TTLs advance instantly.

mod helpers;
mod managed;
mod queued;
mod status;
