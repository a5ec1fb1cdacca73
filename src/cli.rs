use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// hostharden - inspect and remediate Linux host configuration
#[derive(Parser, Debug)]
#[command(name = "hostharden")]
#[command(about = "Inspect and safely remediate Linux host hardening settings")]
#[command(version)]
pub struct Cli {
    /// Tool configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Approve every change without prompting
    #[arg(long, global = true, conflicts_with = "check")]
    pub yes: bool,

    /// Report only: deny every change
    #[arg(long, global = true)]
    pub check: bool,

    /// More diagnostic output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Configure NTP time synchronisation (chrony)
    Ntp,
    /// Harden SSH daemon options
    Ssh,
    /// Enforce password ageing in login.defs
    PasswordPolicy,
    /// Harden kernel network parameters
    Sysctl,
    /// Restrict GRUB config permissions
    Grub,
    /// Enforce log rotation and compression
    Logrotate,
    /// Set SELinux mode
    Selinux,
    /// Enable the Fail2Ban SSH jail
    Fail2ban,
    /// AIDE file integrity
    Aide {
        #[command(subcommand)]
        action: AideCommands,
    },
    /// Run an OpenSCAP compliance scan
    Oscap {
        /// XCCDF profile id
        #[arg(long)]
        profile: Option<String>,
        /// SCAP datastream file
        #[arg(long)]
        datastream: Option<PathBuf>,
    },
    /// Audit zombie processes
    Processes,
    /// Check a password against known breaches
    CheckPassword {
        /// Read the password from stdin without prompting
        #[arg(long)]
        stdin: bool,
    },
    /// Run every configuration routine in menu order
    All,
    /// Interactive numbered menu
    Menu,
    /// Validate a configuration file
    ValidateConfig {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum AideCommands {
    /// Create the baseline database
    Init,
    /// Compare the file system with the baseline
    Check,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["hostharden", "--yes", "ssh"]).unwrap();
        assert!(cli.yes);
        assert_eq!(cli.command, Some(Commands::Ssh));

        let cli = Cli::try_parse_from(["hostharden", "aide", "init"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Aide { action: AideCommands::Init }));

        let cli = Cli::try_parse_from(["hostharden", "check-password", "--stdin"]).unwrap();
        assert_eq!(cli.command, Some(Commands::CheckPassword { stdin: true }));
    }

    #[test]
    fn test_no_command_means_menu() {
        let cli = Cli::try_parse_from(["hostharden"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_yes_and_check_conflict() {
        assert!(Cli::try_parse_from(["hostharden", "--yes", "--check", "sysctl"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["hostharden", "password-policy", "--check", "-c", "/tmp/h.json"]).unwrap();
        assert!(cli.check);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/h.json")));
    }

    #[test]
    fn test_oscap_options() {
        let cli = Cli::try_parse_from(["hostharden", "oscap", "--profile", "p1"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Oscap {
                profile: Some("p1".into()),
                datastream: None
            })
        );
    }
}
