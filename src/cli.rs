use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "clical",
    version,
    about = "Clock in and out of work and log each work block to Google Calendar",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Summary (title) of the event on Google Calendar; used by `clockin`.
    #[arg(short, long, global = true, value_name = "TEXT")]
    pub summary: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Clock in to work.
    #[command(name = "clockin", visible_alias = "ci")]
    ClockIn,
    /// Clock out of work and publish the work block.
    #[command(name = "clockout", visible_alias = "co")]
    ClockOut,
    /// Show whether a work block is in progress.
    Status,
    /// List the next events on the target calendar.
    Upcoming {
        /// How many events to show.
        #[arg(short = 'n', long, value_name = "COUNT")]
        max: Option<u32>,
    },
    /// Check credentials, token cache and calendar configuration.
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn short_aliases_map_to_commands() {
        assert_eq!(parse(&["clical", "ci"]).command, Commands::ClockIn);
        assert_eq!(parse(&["clical", "clockin"]).command, Commands::ClockIn);
        assert_eq!(parse(&["clical", "co"]).command, Commands::ClockOut);
        assert_eq!(parse(&["clical", "clockout"]).command, Commands::ClockOut);
    }

    #[test]
    fn summary_flag_works_before_or_after_command() {
        let before = parse(&["clical", "-s", "Deep work", "ci"]);
        assert_eq!(before.summary.as_deref(), Some("Deep work"));
        let after = parse(&["clical", "clockin", "--summary", "Review"]);
        assert_eq!(after.summary.as_deref(), Some("Review"));
        assert_eq!(parse(&["clical", "ci"]).summary, None);
    }

    #[test]
    fn upcoming_takes_optional_count() {
        assert_eq!(
            parse(&["clical", "upcoming", "-n", "3"]).command,
            Commands::Upcoming { max: Some(3) }
        );
        assert_eq!(
            parse(&["clical", "upcoming"]).command,
            Commands::Upcoming { max: None }
        );
    }

    #[test]
    fn unknown_or_missing_command_is_a_usage_error() {
        let unknown = Cli::try_parse_from(["clical", "lunch"]).expect_err("unknown");
        assert!(unknown.use_stderr());
        let missing = Cli::try_parse_from(["clical"]).expect_err("missing");
        assert!(missing.use_stderr());
    }

    #[test]
    fn help_is_not_an_error_stream() {
        let help = Cli::try_parse_from(["clical", "--help"]).expect_err("help");
        assert!(!help.use_stderr());
    }
}
