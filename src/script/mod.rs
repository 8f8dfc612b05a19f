//! Launcher script synthesis.

pub mod launch;

pub use launch::{shell_quote, synthesize, JobEnvironment, ScriptSettings, GENIE_VARIABLES};
