use clap::{Arg, ArgMatches, Command};

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_TOKEN: &str = "vault-token";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";

/// How to obtain a Vault token.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Token(String),
    AppRole {
        role_id: String,
        secret_id: Option<String>,
        wrapped_token: Option<String>,
    },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"***").finish(),
            Self::AppRole { role_id, .. } => f
                .debug_struct("AppRole")
                .field("role_id", role_id)
                .field("secret_id", &"***")
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub auth: Auth,
}

impl Options {
    /// Parse Vault arguments from matches.
    ///
    /// # Errors
    /// Returns an error if neither a token nor a complete AppRole login is given.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let url = get_non_empty(ARG_VAULT_URL)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_VAULT_URL}"))?;

        if let Some(token) = get_non_empty(ARG_VAULT_TOKEN) {
            return Ok(Self {
                url,
                auth: Auth::Token(token),
            });
        }

        let role_id = get_non_empty(ARG_VAULT_ROLE_ID).ok_or_else(|| {
            anyhow::anyhow!(
                "missing required argument: --{ARG_VAULT_TOKEN} or --{ARG_VAULT_ROLE_ID}"
            )
        })?;
        let secret_id = get_non_empty(ARG_VAULT_SECRET_ID);
        let wrapped_token = get_non_empty(ARG_VAULT_WRAPPED_TOKEN);

        if secret_id.is_none() && wrapped_token.is_none() {
            anyhow::bail!(
                "missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN}"
            );
        }

        Ok(Self {
            url,
            auth: Auth::AppRole {
                role_id,
                secret_id,
                wrapped_token,
            },
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault base URL, e.g. http://127.0.0.1:8200")
                .env("TESSERA_VAULT_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_VAULT_TOKEN)
                .long(ARG_VAULT_TOKEN)
                .help("Static Vault token (not renewed)")
                .env("TESSERA_VAULT_TOKEN")
                .hide_env_values(true)
                .conflicts_with_all([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN]),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault AppRole role id")
                .env("TESSERA_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault AppRole secret id")
                .env("TESSERA_VAULT_SECRET_ID")
                .hide_env_values(true)
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Response-wrapped AppRole secret id")
                .env("TESSERA_VAULT_WRAPPED_TOKEN")
                .hide_env_values(true),
        )
}
