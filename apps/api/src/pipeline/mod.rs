//! Query Pipeline: one user question through relevance, generation,
//! validated execution with a single correction attempt, and persistence.

pub mod correction;
pub mod handlers;
pub mod locks;
pub mod turn;

pub use turn::{QueryPipeline, TurnOutcome};
