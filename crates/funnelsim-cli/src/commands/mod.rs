pub mod config;
pub mod generate;
pub mod summarize;
pub mod verify;

pub use config::ConfigCommand;
pub use generate::GenerateCommand;
pub use summarize::SummarizeCommand;
pub use verify::VerifyCommand;
