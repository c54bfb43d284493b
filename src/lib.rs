//! Execution engine for authored Python code units.
//!
//! A unit is a code fragment plus declared inputs and outputs. The engine
//! validates inputs against a workspace, synthesizes a complete program
//! around the fragment, runs it in a child interpreter and decodes the
//! delimited JSON result. Units can also be introspected from their type
//! annotations and tested with a generated pytest harness.

pub mod catalog;
pub mod cmd;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod harness;
pub mod introspect;
pub mod runner;
pub mod synth;
pub mod unit;
pub mod validate;
pub mod verdict;
pub mod workspace;

#[cfg(test)]
mod test_support;
