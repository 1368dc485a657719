pub mod cli;

pub use cli::{parse_cli_verb, run_cli, CliExit, CliVerb};
