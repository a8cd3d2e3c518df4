// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CLI Interface
//!
//! Defines the command-line argument structure for `ddpoa-node` using
//! `clap` derive, matching the original Sawtooth consensus-engine CLI
//! contract (§6): a validator endpoint, a component endpoint, a repeatable
//! verbosity flag, and the built-in `--version` flag.

use clap::Parser;

/// DDPoA consensus engine.
///
/// Connects to a host Sawtooth-style validator over its consensus-engine
/// component endpoint and drives block production, voting, and catch-up
/// for the local validator. Does not itself store blocks, schedule
/// transactions, or manage cryptographic identity — those remain the host
/// runtime's concern.
#[derive(Parser, Debug)]
#[command(
    name = "ddpoa-node",
    about = "DDPoA leader-rotating proof-of-authority consensus engine",
    version,
    propagate_version = true
)]
pub struct DdpoaCli {
    /// Host validator endpoint.
    #[arg(short = 'C', long = "connect", default_value = "tcp://localhost:5050")]
    pub connect: String,

    /// Host component endpoint (settings, block operations).
    #[arg(long = "component", default_value = "tcp://localhost:4004")]
    pub component: String,

    /// Increase logging verbosity. May be repeated (`-v`, `-vv`, `-vvv`).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl DdpoaCli {
    /// Maps `-v` count to a `tracing_subscriber::EnvFilter` directive,
    /// absent an explicit `RUST_LOG` override.
    pub fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "ddpoa_node=info,ddpoa_engine=info",
            1 => "ddpoa_node=debug,ddpoa_engine=debug",
            _ => "ddpoa_node=trace,ddpoa_engine=trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        DdpoaCli::command().debug_assert();
    }

    #[test]
    fn defaults_match_spec_endpoints() {
        let cli = DdpoaCli::parse_from(["ddpoa-node"]);
        assert_eq!(cli.connect, "tcp://localhost:5050");
        assert_eq!(cli.component, "tcp://localhost:4004");
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn verbose_count_increases_with_repeated_flag() {
        let cli = DdpoaCli::parse_from(["ddpoa-node", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.default_log_level(), "ddpoa_node=trace,ddpoa_engine=trace");
    }
}
