//! Core residency modules
//!
//! Contains the residency state machine, the shared slot allocator and
//! the per-cycle update orchestrator.

pub mod feedback;
pub mod heap_allocator;
pub mod residency_table;
pub mod update_manager;
