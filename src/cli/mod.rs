//! Command-line interface

pub mod commands;

pub use commands::{
    cmd_deliver, cmd_discover, cmd_hashcash_check, cmd_hashcash_mint, cmd_send, cmd_serve,
    CliResult, Draft,
};
