//! Side-effecting operations: filesystem, subprocesses, collaborators.

pub mod collaborators;
pub mod config;
pub mod gate;
pub mod journal;
pub mod process;
pub mod sandbox;
