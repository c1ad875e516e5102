//! Renders the `echo-nats(1)` manual page from the clap definition.
//!
//! The page lands in `target/generated-man` unless `ECHO_NATS_MAN_DIR`
//! names another directory.

use std::{env, fs, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

const MAN_DIR_VAR: &str = "ECHO_NATS_MAN_DIR";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed={MAN_DIR_VAR}");

    let out_dir = env::var_os(MAN_DIR_VAR)
        .map_or_else(|| PathBuf::from("target/generated-man"), PathBuf::from);
    fs::create_dir_all(&out_dir)?;

    let command = cli::Cli::command();
    let page = format!("{}.1", command.get_name());
    let mut rendered = Vec::new();
    Man::new(command).render(&mut rendered)?;
    fs::write(out_dir.join(page), rendered)?;
    Ok(())
}
