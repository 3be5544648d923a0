// ABOUTME: secretary-chat - terminal front-end for the secretary agent stream
// ABOUTME: Callback bridge, text rendering, and the send/repl commands

pub mod bridge;
pub mod cli;
pub mod render;
