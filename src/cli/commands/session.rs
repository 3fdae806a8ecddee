use crate::token::MAX_TTL;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{path::PathBuf, time::Duration};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval";
pub const ARG_IDENTITY_KEY_PATH: &str = "identity-key-path";
pub const ARG_DEV: &str = "dev";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// `None` disables the periodic sweep; logins still trigger one.
    pub sweep_interval: Option<Duration>,
    pub identity_key_path: Option<PathBuf>,
    pub dev: bool,
}

impl Options {
    /// Parse token and session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a lifetime is zero or longer than [`MAX_TTL`].
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or(0);

        let access_token_ttl = seconds(ARG_ACCESS_TOKEN_TTL);
        let refresh_token_ttl = seconds(ARG_REFRESH_TOKEN_TTL);
        if access_token_ttl == 0 || refresh_token_ttl == 0 {
            anyhow::bail!("token lifetimes must be greater than zero");
        }
        if access_token_ttl > MAX_TTL.as_secs() || refresh_token_ttl > MAX_TTL.as_secs() {
            anyhow::bail!(
                "token lifetimes must not exceed {} seconds",
                MAX_TTL.as_secs()
            );
        }

        let sweep_interval = match seconds(ARG_SWEEP_INTERVAL) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .unwrap_or_else(|| crate::token::DEFAULT_ISSUER.to_string()),
            access_token_ttl: Duration::from_secs(access_token_ttl),
            refresh_token_ttl: Duration::from_secs(refresh_token_ttl),
            sweep_interval,
            identity_key_path: matches
                .get_one::<String>(ARG_IDENTITY_KEY_PATH)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            dev: matches.get_flag(ARG_DEV),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Value of the iss claim in issued tokens")
                .env("TESSERA_ISSUER")
                .default_value(crate::token::DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .env("TESSERA_ACCESS_TOKEN_TTL")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .env("TESSERA_REFRESH_TOKEN_TTL")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Seconds between sweeps of expired whitelist entries, 0 to sweep only on login")
                .env("TESSERA_SWEEP_INTERVAL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_IDENTITY_KEY_PATH)
                .long(ARG_IDENTITY_KEY_PATH)
                .help("RSA private key (PEM) for identity cards, read from keys/rsa in Vault when unset")
                .env("TESSERA_IDENTITY_KEY_PATH"),
        )
        .arg(
            Arg::new(ARG_DEV)
                .long(ARG_DEV)
                .help("Development mode: refresh cookie without Secure and with SameSite=None")
                .env("TESSERA_DEV")
                .action(ArgAction::SetTrue),
        )
}
