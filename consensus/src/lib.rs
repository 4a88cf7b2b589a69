//! GHOSTDAG consensus: entity stores, reachability, DAG processes and the block processing pipeline.
//!
//! The [`consensus::Consensus`] facade implements the `ConsensusApi` of `kestrel-consensus-core` over a
//! single database. Blocks flow through the header, body, virtual and pruning processors in that order.
//!
//! Stored data obeys the following inclusion chain, up to transient states during pruning:
//! blocks with a body ⊆ blocks with relations ⊆ blocks with reachability data ⊆ blocks with a header.
//! Headers of past pruning points and of pruning proofs may exist without reachability data.

pub mod consensus;
pub mod model;
pub mod pipeline;
pub mod processes;
