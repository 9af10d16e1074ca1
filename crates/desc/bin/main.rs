#[macro_use]
extern crate tracing;

mod args;
mod render;
mod runner;
mod utils;

use args::DescArgs;
use clap::Parser;
use eyre::Result;

fn main() -> Result<()> {
    utils::install_error_handler();
    utils::subscriber();
    utils::enable_paint();

    let opts = DescArgs::parse();
    opts.run()
}
