use clap::Parser;
use summon_common::{IdentityError, ServiceIdentity};

/// Positional arguments every run takes.
pub const EXPECTED_ARGS: usize = 2;

#[derive(Debug, Parser)]
#[command(name = "summon")]
#[command(
    about = "Run one inference, launching a server first if none is running",
    long_about = None
)]
#[command(disable_help_flag = true)]
pub struct Args {
    /// AI service type
    #[arg(allow_hyphen_values = true)]
    pub service_type: String,

    /// Model specification
    #[arg(allow_hyphen_values = true)]
    pub model_spec: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("expected 2 arguments, got {0}; usage: summon <service_type> <model_spec>")]
    Count(usize),
    #[error(transparent)]
    Parse(#[from] clap::Error),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// `argv` includes the program name.
pub fn has_expected_count(argv: &[String]) -> bool {
    argv.len() == EXPECTED_ARGS + 1
}

/// The identity named on the command line. Reads nothing but `argv`.
pub fn parse_identity(argv: &[String]) -> Result<ServiceIdentity, ArgumentError> {
    if !has_expected_count(argv) {
        return Err(ArgumentError::Count(argv.len().saturating_sub(1)));
    }
    let args = Args::try_parse_from(argv)?;
    Ok(ServiceIdentity::new(args.service_type, args.model_spec)?)
}
