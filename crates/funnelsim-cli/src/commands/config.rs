use clap::Args;
use funnelsim_core::GeneratorConfig;

#[derive(Args)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        print!("{}", GeneratorConfig::default().to_yaml()?);
        Ok(())
    }
}
