//! Command line of the `buildtunnel` binary.
//!
//! Lease settings come from flags or from their `BUILDTUNNEL_*`
//! environment variables; the subcommand picks the [`Mode`].

use std::ffi::OsString;

use buildtunnel_core::{Error, LeaseRequest, Platform, Result};
use buildtunnel_lease::control::DEFAULT_API_URL;
use buildtunnel_lease::{ControlPlaneConfig, LeaseSettings, host_platform, new_build_id};
use buildtunnel_transport::ChildCommand;
use clap::{Parser, Subcommand};

use crate::session::Mode;

/// Lease a remote BuildKit machine and expose it locally.
#[derive(Parser, Debug)]
#[command(name = "buildtunnel", version, about)]
pub struct Cli {
    /// API token for the control plane
    #[arg(long, env = "BUILDTUNNEL_TOKEN", hide_env_values = true, value_parser = non_blank)]
    pub token: String,

    /// Base URL of the control plane
    #[arg(long, env = "BUILDTUNNEL_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Build identifier; a random one is used when unset
    #[arg(long, env = "BUILDTUNNEL_BUILD_ID")]
    pub build_id: Option<String>,

    /// Machine platform (amd64 or arm64); the host architecture when unset
    #[arg(long, env = "BUILDTUNNEL_PLATFORM")]
    pub platform: Option<String>,

    /// What to run
    #[command(subcommand)]
    pub command: Command,
}

/// What to run against the leased machine.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the BuildKit API on stdin and stdout
    DialStdio,
    /// Run a program with BUILDKIT_HOST pointing at a local proxy
    Exec {
        /// Program and its arguments, passed through untouched
        #[arg(trailing_var_arg = true, required = true, value_name = "PROGRAM")]
        command: Vec<OsString>,
    },
    /// Like exec, relaying raw bytes over one tunnel per connection
    Relay {
        /// Program and its arguments, passed through untouched
        #[arg(trailing_var_arg = true, required = true, value_name = "PROGRAM")]
        command: Vec<OsString>,
    },
}

impl Cli {
    /// The lease to ask for.
    #[must_use]
    pub fn settings(&self) -> LeaseSettings {
        let build_id = self
            .build_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(new_build_id, str::to_string);
        let platform = self
            .platform
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map_or_else(host_platform, Platform::from);

        LeaseSettings::new(
            ControlPlaneConfig::new(self.api_url.trim()),
            LeaseRequest::new(build_id, self.token.clone(), platform),
        )
    }

    /// The mode the subcommand selects.
    pub fn mode(self) -> Result<Mode> {
        let (command, wrap): (_, fn(ChildCommand) -> Mode) = match self.command {
            Command::DialStdio => return Ok(Mode::DialStdio),
            Command::Exec { command } => (command, Mode::Exec),
            Command::Relay { command } => (command, Mode::Relay),
        };
        ChildCommand::from_argv(command)
            .map(wrap)
            .ok_or_else(|| Error::config("no program to run"))
    }
}

fn non_blank(value: &str) -> std::result::Result<String, String> {
    match value.trim() {
        "" => Err("must not be empty".to_string()),
        trimmed => Ok(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("buildtunnel").chain(args.iter().copied()))
    }

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dial_stdio() {
        let cli = parse(&["--token", "secret", "dial-stdio"]).unwrap();
        assert!(matches!(cli.mode().unwrap(), Mode::DialStdio));
    }

    #[test]
    fn test_exec_passes_child_flags_through() {
        let cli = parse(&["--token", "secret", "exec", "buildctl", "--help", "--addr", "x"]).unwrap();
        let Mode::Exec(command) = cli.mode().unwrap() else {
            panic!("expected exec mode");
        };
        assert_eq!(command.program(), Path::new("buildctl"));
        assert_eq!(command.arguments(), ["--help", "--addr", "x"].map(OsString::from));
    }

    #[test]
    fn test_relay() {
        let cli = parse(&["--token", "secret", "relay", "docker", "buildx", "build", "."]).unwrap();
        let Mode::Relay(command) = cli.mode().unwrap() else {
            panic!("expected relay mode");
        };
        assert_eq!(command.program(), Path::new("docker"));
        assert_eq!(command.arguments().len(), 3);
    }

    #[test]
    fn test_exec_needs_a_program() {
        for sub in ["exec", "relay"] {
            let err = parse(&["--token", "secret", sub]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument, "{sub}");
        }
    }

    #[test]
    fn test_unknown_subcommand() {
        let err = parse(&["--token", "secret", "serve"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_dial_stdio_takes_no_arguments() {
        assert!(parse(&["--token", "secret", "dial-stdio", "extra"]).is_err());
    }

    #[test]
    fn test_blank_token_rejected() {
        let err = parse(&["--token", "  ", "dial-stdio"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_missing_token() {
        if std::env::var_os("BUILDTUNNEL_TOKEN").is_some() {
            return;
        }
        let err = parse(&["dial-stdio"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_settings_from_flags() {
        let cli = parse(&[
            "--token",
            "secret",
            "--api-url",
            "http://localhost:7000",
            "--build-id",
            "build-42",
            "--platform",
            "arm64",
            "dial-stdio",
        ])
        .unwrap();
        let settings = cli.settings();

        assert_eq!(settings.control_plane.base_url, "http://localhost:7000");
        assert_eq!(settings.request.token, "secret");
        assert_eq!(settings.request.build_id, "build-42");
        assert_eq!(settings.request.platform, Platform::Arm64);
    }

    #[test]
    fn test_settings_defaults() {
        let vars = ["BUILDTUNNEL_API_URL", "BUILDTUNNEL_BUILD_ID", "BUILDTUNNEL_PLATFORM"];
        if vars.iter().any(|var| std::env::var_os(var).is_some()) {
            return;
        }
        let settings = parse(&["--token", "secret", "dial-stdio"]).unwrap().settings();

        assert_eq!(settings.control_plane.base_url, DEFAULT_API_URL);
        assert!(!settings.request.build_id.is_empty());
        assert_eq!(settings.request.platform, host_platform());
    }

    #[test]
    fn test_blank_build_id_is_generated() {
        let settings = parse(&["--token", "secret", "--build-id", " ", "dial-stdio"])
            .unwrap()
            .settings();
        assert!(!settings.request.build_id.trim().is_empty());
    }
}
