use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Directory holding the local vault: accounts, profiles, capsules,
    /// the persisted session, and stored media.
    #[arg(
        long = "vault-dir",
        env = "CHRONOVAULT_DIR",
        value_name = "DIR",
        default_value = ".chronovault",
        help = "Where the vault keeps its documents and media"
    )]
    pub vault_dir: PathBuf,

    /// How long to wait for the identity provider's first report before
    /// assuming a signed-out session.
    #[arg(
        long = "resolve-timeout-secs",
        env = "CHRONOVAULT_RESOLVE_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 5,
        help = "Seconds to wait for the stored session to resolve at startup"
    )]
    pub resolve_timeout_secs: u64,
}
