// ABOUTME: Subcommand implementations for secretary-chat
// ABOUTME: send for scripting, repl for interactive use

pub mod repl;
pub mod send;
