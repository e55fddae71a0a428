//! Command trait for the hookline CLI
//!
//! Every subcommand is a clap `Args` struct implementing [`Command`], which
//! keeps argument parsing separate from execution and lets tests drive
//! commands without going through the command line.

use crate::error::Result;

/// Trait for all hookline commands
pub trait Command {
    /// The type returned by this command
    type Output;

    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns a `CommandError` describing what went wrong.
    fn execute(&self) -> Result<Self::Output>;
}
