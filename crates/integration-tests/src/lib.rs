//! # Integration Tests Crate
//!
//! End-to-end scenarios that run the full ledger stack in memory: the
//! in-memory store, both state stores, the block log, the ledger façade,
//! the executor and the mock chaincode VM.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! ├── src/
//! │   ├── lib.rs       # This file
//! │   ├── harness.rs   # In-memory node harness shared by all scenarios
//! │   └── scenarios.rs # Set lifecycle, mutation and replay scenarios
//! ```
//!
//! ## Scenario Categories
//!
//! 1. **Set Lifecycle**: introduction, extension, queries
//! 2. **Mutation**: index changes, rejected mutations, double writes
//! 3. **Replay**: state rollback and deterministic re-execution
//! 4. **Commit Protocol**: hash previews, event slots, batch discipline

pub mod harness;

#[cfg(test)]
mod scenarios;
