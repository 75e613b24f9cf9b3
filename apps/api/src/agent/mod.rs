//! SQL Generation Agent: turns a question, its relevant-table context and the
//! conversation so far into a `StructuredResult`.

pub mod generator;
pub mod prompts;
pub mod response;

pub use generator::{Correction, GenerationRequest, LlmSqlAgent, SqlAgent};
pub use response::StructuredResult;
