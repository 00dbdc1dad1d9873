use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analyze;
mod verify;

#[derive(Parser)]
#[command(name = "presencia", version, about = "Liveness check for citizen registration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score still images with the heuristic face analyzer
    Analyze {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Region of interest preset
        #[arg(long, value_enum, default_value_t = analyze::Roi::Wide)]
        roi: analyze::Roi,
    },
    /// Run one verification session and print the handoff payload
    Verify(verify::VerifyArgs),
    /// Print a builtin liveness profile as TOML, or list the builtins
    Profile { name: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze { images, roi } => analyze::run(&images, roi),
        Command::Verify(args) => verify::run(args).await,
        Command::Profile { name } => print_profile(name.as_deref()),
    }
}

fn print_profile(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            let profile = presencia_core::LivenessProfile::builtin(name)?;
            print!("{}", profile.to_toml_string()?);
        }
        None => {
            for name in presencia_core::profile::BUILTIN_PROFILES {
                println!("{name}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_requires_an_image() {
        assert!(Cli::try_parse_from(["presencia", "analyze"]).is_err());
        assert!(Cli::try_parse_from(["presencia", "analyze", "a.png", "--roi", "narrow"]).is_ok());
    }

    #[test]
    fn test_unknown_profile_is_an_error() {
        assert!(print_profile(Some("mirror")).is_err());
        assert!(print_profile(Some("gestures")).is_ok());
    }
}
