use anyhow::Result;
use facet::config::FacetConfig;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::path::PathBuf;

fn main() -> Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = FacetConfig::load(path.as_deref())?;

    TermLogger::init(
        config.log_filter(),
        ConfigBuilder::default().build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;
    log::debug!("loaded configuration: {:?}", config);

    facet::repl::start(config)
}
