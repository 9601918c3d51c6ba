//! CLI command handlers

use anyhow::Result;
use clap::Args;
use tracing::info;

use atorch_dist::{CandleAccelerator, DistributedState, LaunchEnv, TcpRendezvous};

use crate::train::{AtorchArgs, DeviceContext};

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON object with the training options
    #[arg(long, required = true)]
    pub config: String,

    /// Override an option: key=value (value parsed as JSON when possible)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<AtorchArgs> {
        Ok(AtorchArgs::from_json_file(&self.config, &self.overrides)?)
    }
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Also write atorch_args.json into this directory
    #[arg(long)]
    pub output: Option<String>,
}

pub fn validate(args: ConfigArgs) -> Result<()> {
    let atorch_args = args.load()?;
    info!(
        "✅ {} is valid (strategy={}, wrap_cls={:?}, max_shard_size={})",
        args.config,
        atorch_args.atorch_opt,
        atorch_args.wrap_cls_names(),
        atorch_args.max_shard_size
    );
    Ok(())
}

pub fn dump(args: DumpArgs) -> Result<()> {
    let atorch_args = args.config.load()?;
    println!("{}", atorch_args.to_json_string()?);

    if let Some(dir) = &args.output {
        atorch_args.save_args(dir)?;
    }
    Ok(())
}

pub fn setup_devices(args: ConfigArgs) -> Result<()> {
    let mut atorch_args = args.load()?;

    let env = LaunchEnv::from_env();
    let mut process_group = TcpRendezvous::from_env()?;
    let accelerator = CandleAccelerator::new();
    let mut state = DistributedState::default();

    let device = atorch_args.resolve_device(&mut DeviceContext {
        process_group: &mut process_group,
        accelerator: &accelerator,
        state: &mut state,
        env: &env,
    })?;

    info!("🚀 Bound to {} (n_gpu={})", device, atorch_args.n_gpu());
    if state.is_main_process() {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }
    Ok(())
}
