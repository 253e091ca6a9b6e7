//! Differential codegen-size fuzzing engine.
//!
//! This crate provides:
//! - [`template`] - Source parameterizer turning seed C files into mutation targets
//! - [`corpus`] - Seed directory scanning and template loading
//! - [`mutate`] - Per-type mutation strategies (Random, Boundary, Perturb)
//! - [`oracle`] - Differential compilation, size metric, and the ASAN safety gate
//! - [`search`] - The fuzzing loop: worker pool, triage, backtracking, minimization
//! - [`checkpoint`] - Accepted-result persistence for resumable sessions
//! - [`analytics`] - Append-only CSV telemetry
//! - [`report`] - Mutant source, diff, and ratio-line output for accepted results
//!
//! The search walks each template's input space one position at a time,
//! compiles every candidate with a current compiler and a set of older
//! versions of the same family, and accepts mutants whose assembly line
//! count regresses past a configurable ratio and survive an
//! address/undefined-behavior sanitizer run.

pub mod analytics;
pub mod checkpoint;
pub mod corpus;
pub mod mutate;
pub mod oracle;
pub mod report;
pub mod search;
pub mod template;
