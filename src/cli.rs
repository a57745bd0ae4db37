//! CLI argument definitions using clap derive macros (§6.3, §10.5).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default config file path when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Unattended backup daemon for a Pixiv account's bookmarks and followed
/// artists.
///
/// Mirrors the upstream works a configured account has bookmarked or whose
/// authors it follows to local files, polling a home-router filesystem
/// under a single long-lived process.
#[derive(Parser, Debug)]
#[command(name = "pixiv-backup")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the TOML configuration snapshot (§6.2).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Run as a long-lived daemon. Alternate invocation for `start` with no
    /// flags (§6.3): `pixiv-backup --daemon` is equivalent to
    /// `pixiv-backup start`.
    #[arg(long)]
    pub daemon: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the daemon in the foreground and run rounds until stopped.
    Start {
        /// Drop the force-trigger sentinel before launch, so the first
        /// round runs immediately regardless of whatever the configured
        /// sync interval would otherwise have the daemon wait for.
        #[arg(long)]
        force_run: bool,
    },

    /// Stop a running daemon.
    ///
    /// Process supervision is out of this core's scope (§1 Non-goals) — the
    /// router's service-supervision subsystem owns starting and stopping
    /// the process. This subcommand exists so dispatch over the full §6.3
    /// surface is total; it performs no action of its own.
    Stop,

    /// Restart a running daemon. See `Stop`: out of scope for the same
    /// reason.
    Restart,

    /// Print the last published runtime status snapshot (read-only; never
    /// touches the live queue, §5).
    Status,

    /// Validate configuration and upstream connectivity without running a
    /// scan or download round.
    Test,

    /// Drop the force-trigger sentinel only. Does not start a daemon — a
    /// daemon already running picks it up on its next wait-phase poll
    /// (§4.9).
    Trigger,

    /// Run a single synchronous round with an explicit download budget.
    Run {
        /// Overrides `max_downloads` for this round only (0 = unlimited,
        /// per the Open Question resolution in `DESIGN.md`).
        count: u32,
    },

    /// Tail the audit log (§4.8). The log follower itself is an external
    /// collaborator (§1); this subcommand only resolves which file(s) to
    /// read and how many lines, exposing the surface the follower drives.
    Log {
        /// Number of trailing lines to show.
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        /// Print the requested lines once and exit instead of following.
        #[arg(long)]
        no_follow: bool,
        /// Read from the day's file under `data/logs/` (default).
        #[arg(long, conflicts_with = "syslog")]
        file: bool,
        /// Read from syslog instead of the on-disk log file.
        #[arg(long, conflicts_with = "file")]
        syslog: bool,
    },

    /// Diagnose or repair on-disk state.
    ///
    /// External to the core (§1 Non-goals: "the repair/diagnose tool"); this
    /// subcommand exists only so dispatch is total, not to implement repair
    /// logic here.
    Repair {
        #[arg(long)]
        check: bool,
        #[arg(long)]
        apply: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_is_used_when_not_specified() {
        let args = Args::try_parse_from(["pixiv-backup", "status"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn verbose_flag_increments_count() {
        let args = Args::try_parse_from(["pixiv-backup", "-v", "status"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["pixiv-backup", "-vv", "status"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn quiet_flag_parses() {
        let args = Args::try_parse_from(["pixiv-backup", "--quiet", "status"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn start_parses_with_force_run() {
        let args = Args::try_parse_from(["pixiv-backup", "start", "--force-run"]).unwrap();
        assert!(matches!(args.command, Some(Command::Start { force_run: true })));
    }

    #[test]
    fn start_without_force_run_defaults_to_false() {
        let args = Args::try_parse_from(["pixiv-backup", "start"]).unwrap();
        assert!(matches!(args.command, Some(Command::Start { force_run: false })));
    }

    #[test]
    fn run_parses_positional_count() {
        let args = Args::try_parse_from(["pixiv-backup", "run", "5"]).unwrap();
        assert!(matches!(args.command, Some(Command::Run { count: 5 })));
    }

    #[test]
    fn run_requires_a_count() {
        let result = Args::try_parse_from(["pixiv-backup", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn daemon_flag_parses_without_a_subcommand() {
        let args = Args::try_parse_from(["pixiv-backup", "--daemon"]).unwrap();
        assert!(args.daemon);
        assert!(args.command.is_none());
    }

    #[test]
    fn log_file_and_syslog_are_mutually_exclusive() {
        let result = Args::try_parse_from(["pixiv-backup", "log", "--file", "--syslog"]);
        assert!(result.is_err());
    }

    #[test]
    fn log_defaults_to_fifty_lines_and_follow() {
        let args = Args::try_parse_from(["pixiv-backup", "log"]).unwrap();
        match args.command {
            Some(Command::Log { lines, no_follow, file, syslog }) => {
                assert_eq!(lines, 50);
                assert!(!no_follow);
                assert!(!file);
                assert!(!syslog);
            }
            _ => panic!("expected Log command"),
        }
    }

    #[test]
    fn repair_accepts_check_and_apply_flags() {
        let args = Args::try_parse_from(["pixiv-backup", "repair", "--check"]).unwrap();
        assert!(matches!(args.command, Some(Command::Repair { check: true, apply: false })));
    }

    #[test]
    fn trigger_takes_no_arguments() {
        let args = Args::try_parse_from(["pixiv-backup", "trigger"]).unwrap();
        assert!(matches!(args.command, Some(Command::Trigger)));
    }

    #[test]
    fn help_flag_shows_usage() {
        let result = Args::try_parse_from(["pixiv-backup", "--help"]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        let result = Args::try_parse_from(["pixiv-backup", "frobnicate"]);
        assert!(result.is_err());
    }
}
