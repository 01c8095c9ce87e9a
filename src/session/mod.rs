//! Submitter sessions

pub mod assembler;

pub use assembler::StepAssembler;
