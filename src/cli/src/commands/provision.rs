//! `boxcall provision` command: build an image with job inputs baked in.

use std::path::PathBuf;

use anyhow::Context;
use boxcall_core::{BoxcallConfig, JobInputs};
use boxcall_runtime::oci::{create_provisioned_image, DaemonEndpoint, DockerDaemon};
use clap::Args;

#[derive(Args)]
pub struct ProvisionArgs {
    /// Base image (default: provision.base_image from config)
    #[arg(long)]
    pub image: Option<String>,

    /// Directory the inputs are copied to (default: provision.workdir from config)
    #[arg(long)]
    pub workdir: Option<String>,

    /// Job input file (NAME=PATH), can be repeated
    #[arg(long = "input")]
    pub input: Vec<String>,

    /// Always attempt to pull a newer base image
    #[arg(long)]
    pub pull: bool,
}

pub fn execute(args: ProvisionArgs, config: &BoxcallConfig) -> anyhow::Result<()> {
    let image = args
        .image
        .unwrap_or_else(|| config.provision.base_image.clone());
    let workdir = args
        .workdir
        .unwrap_or_else(|| config.provision.workdir.clone());
    let pull = args.pull || config.provision.pull;

    let mut inputs = JobInputs::new();
    for (name, path) in parse_inputs(&args.input).map_err(anyhow::Error::msg)? {
        let content = std::fs::read(&path)
            .with_context(|| format!("Failed to read input '{}' from {}", name, path.display()))?;
        inputs.insert(name, content);
    }

    let endpoint =
        DaemonEndpoint::from_config(&config.daemon).context("Failed to resolve build daemon")?;
    let daemon = DockerDaemon::connect(&endpoint)
        .with_context(|| format!("Failed to connect to {}", endpoint.base_url))?;

    let image_id = create_provisioned_image(&daemon, &image, &workdir, &inputs, pull)
        .with_context(|| format!("Failed to provision image from {}", image))?;

    println!("{image_id}");
    Ok(())
}

/// Parse NAME=PATH pairs.
fn parse_inputs(args: &[String]) -> Result<Vec<(String, PathBuf)>, String> {
    let mut inputs = Vec::new();
    for arg in args {
        let (name, path) = arg
            .split_once('=')
            .filter(|(name, path)| !name.is_empty() && !path.is_empty())
            .ok_or_else(|| format!("Invalid input (expected NAME=PATH): {arg}"))?;
        inputs.push((name.to_string(), PathBuf::from(path)));
    }
    Ok(inputs)
}
