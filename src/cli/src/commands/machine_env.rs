//! `boxcall machine-env` command: show a docker-machine host's daemon settings.

use std::collections::HashMap;

use anyhow::Context;
use boxcall_runtime::oci::{docker_machine_env, DaemonEndpoint};
use clap::Args;

#[derive(Args)]
pub struct MachineEnvArgs {
    /// Machine name
    pub machine: String,

    /// Verify the daemon's TLS hostname
    #[arg(long)]
    pub assert_hostname: bool,
}

pub fn execute(args: MachineEnvArgs) -> anyhow::Result<()> {
    let env = docker_machine_env(&args.machine)
        .with_context(|| format!("Failed to query machine '{}'", args.machine))?;
    print!("{}", render(&env, args.assert_hostname)?);
    Ok(())
}

/// Environment lines, sorted, followed by the resolved endpoint.
fn render(env: &HashMap<String, String>, assert_hostname: bool) -> anyhow::Result<String> {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();

    let mut out = String::new();
    for key in keys {
        out.push_str(&format!("{}={}\n", key, env[key]));
    }

    let endpoint = DaemonEndpoint::from_env_map(env, assert_hostname)?;
    out.push_str(&format!("# daemon: {}", endpoint.base_url));
    if let Some(tls) = &endpoint.tls {
        let dir = tls.ca_cert.parent().unwrap_or(tls.ca_cert.as_path());
        out.push_str(&format!(" (tls, certs in {})", dir.display()));
    }
    out.push('\n');
    Ok(out)
}
