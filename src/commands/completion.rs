//! `sta completion`: shell completion scripts.

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::program_name::program_name;

pub fn run(shell: Shell) {
    let mut command = crate::Cli::command();
    let name = program_name().to_string();
    generate(shell, &mut command, name, &mut std::io::stdout());
}
