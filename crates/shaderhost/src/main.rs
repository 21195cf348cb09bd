mod cli;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Check(args) => run::check(args),
        Command::Source(args) => run::source(args),
        Command::Preprocess(args) => run::preprocess(args),
        Command::Simulate(args) => run::simulate(args),
    }
}
