use crate::cli::{
    actions::{server, Action},
    commands::{session, vault},
};
use anyhow::Result;

/// Turn parsed arguments into the action to run.
///
/// # Errors
/// Returns an error if the session or Vault arguments are incomplete.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        session: session::Options::parse(matches)?,
        vault: vault::Options::parse(matches)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use std::time::Duration;

    #[test]
    fn server_action_from_args() -> Result<()> {
        temp_env::with_vars(
            [
                ("TESSERA_VAULT_URL", None::<&str>),
                ("TESSERA_VAULT_TOKEN", None),
                ("TESSERA_VAULT_ROLE_ID", None),
                ("TESSERA_VAULT_SECRET_ID", None),
                ("TESSERA_VAULT_WRAPPED_TOKEN", None),
                ("TESSERA_PORT", None),
                ("TESSERA_DEV", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "tessera",
                    "--port",
                    "9090",
                    "--vault-url",
                    "http://127.0.0.1:8200",
                    "--vault-role-id",
                    "role",
                    "--vault-wrapped-token",
                    "wrapped",
                    "--refresh-token-ttl",
                    "3600",
                    "--dev",
                ]);

                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 9090);
                assert!(args.session.dev);
                assert_eq!(args.session.refresh_token_ttl, Duration::from_secs(3600));
                assert_eq!(
                    args.vault.auth,
                    vault::Auth::AppRole {
                        role_id: "role".to_string(),
                        secret_id: None,
                        wrapped_token: Some("wrapped".to_string()),
                    }
                );
                Ok(())
            },
        )
    }
}
