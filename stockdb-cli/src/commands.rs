use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update a resource from a YAML file
    Apply {
        /// Resource file to apply
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}
