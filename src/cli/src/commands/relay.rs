//! `boxcall relay` command: interpret a directory of remote call outputs.

use std::path::PathBuf;

use anyhow::Context;
use boxcall_runtime::call::{OutputDir, ResultRelay};
use clap::Args;

#[derive(Args)]
pub struct RelayArgs {
    /// Directory holding the job's output files
    pub dir: PathBuf,

    /// The call was a bound method; also print the updated receiver
    #[arg(long)]
    pub bound: bool,
}

pub fn execute(args: RelayArgs) -> anyhow::Result<()> {
    print!("{}", render(args)?);
    Ok(())
}

fn render(args: RelayArgs) -> anyhow::Result<String> {
    let mut relay = ResultRelay::new(OutputDir::new(&args.dir), args.bound);

    let value = relay
        .return_value()
        .with_context(|| format!("Remote call in {} did not return", args.dir.display()))?;
    let mut out = format!("{}\n", serde_json::to_string_pretty(value)?);

    if args.bound {
        let receiver = relay.updated_receiver()?;
        out.push_str(&format!("receiver: {}\n", serde_json::to_string_pretty(receiver)?));
    }
    Ok(out)
}
