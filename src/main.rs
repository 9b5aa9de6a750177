//! simlab - synthetic telemetry simulator.
//!
//! Serves scenario-driven metrics over HTTP for a pull-based backend.

use simlab_lib::cli::{self, Cli};
use simlab_lib::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
