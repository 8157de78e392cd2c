use clap::Parser;
use featmatch::cli::SubCommandExtend;
use featmatch::config::{Opts, SubCommand};
use log::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    debug!("{:?}", opts);

    match &opts.subcmd {
        SubCommand::Run(config) => config.run(&opts).await,
        SubCommand::Extract(config) => config.run(&opts).await,
        SubCommand::Match(config) => config.run(&opts).await,
        SubCommand::Show(config) => config.run(&opts).await,
    }
}
