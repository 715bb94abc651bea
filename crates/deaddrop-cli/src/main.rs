//! deaddrop: operator CLI for source identities and their keypairs
//!
//! Commands:
//!   codename                  - print a fresh random codename
//!   display <identifier>      - print the display codename for an identifier
//!   hash                      - derive the identifier for a codename
//!   keygen [--new]            - provision the keypair for a codename
//!   fingerprint <identifier>  - look up the key bound to an identifier
//!   encrypt / decrypt         - protect or reveal a payload for an identity
//!   erase <path>              - securely delete a file inside the store
//!   check                     - run the startup precondition checks
//!   config show               - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use deaddrop_core::{DeaddropConfig, LogFormat};
use deaddrop_crypto::{
    find_hmac_secret, Ciphertext, Codename, CryptoServices, Identifier, IdentityHasher, Payload,
    WordList,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "deaddrop",
    version,
    about = "deaddrop identity and encryption core",
    long_about = "deaddrop: codenames, identifiers, per-identity keypairs, encryption, and secure erase"
)]
struct Cli {
    /// Path to the deaddrop configuration file
    #[arg(long, short = 'c', env = "DEADDROP_CONFIG", default_value = "/etc/deaddrop/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new random codename (secret; shown once)
    Codename,

    /// Print the reproducible display codename for an identifier
    Display {
        identifier: String,
    },

    /// Derive the stable identifier for a codename
    Hash {
        /// Codename (prompted for when absent)
        #[arg(long, env = "DEADDROP_CODENAME", hide_env_values = true)]
        codename: Option<String>,
    },

    /// Provision the keypair for a codename, reusing an existing one
    Keygen {
        /// Generate a fresh codename instead of prompting for one
        #[arg(long, conflicts_with = "codename")]
        new: bool,
        #[arg(long, env = "DEADDROP_CODENAME", hide_env_values = true)]
        codename: Option<String>,
    },

    /// Look up the key fingerprint bound to an identifier
    Fingerprint {
        identifier: String,
    },

    /// Encrypt a payload to an identity
    Encrypt {
        /// Recipient identifier
        #[arg(long)]
        to: String,
        /// Input file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Write ciphertext to this path inside the store (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Original filename to embed in the ciphertext
        #[arg(long)]
        filename: Option<String>,
    },

    /// Decrypt a payload with an identity's codename
    Decrypt {
        /// Identifier whose keypair holds the secret key
        #[arg(long)]
        identifier: String,
        /// Ciphertext file (default: stdin)
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,
        /// Plaintext destination (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[arg(long, env = "DEADDROP_CODENAME", hide_env_values = true)]
        codename: Option<String>,
    },

    /// Securely erase a file inside the store
    Erase {
        path: PathBuf,
    },

    /// Verify the environment: engine, erase utility, secret, store
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DeaddropConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    init_logging(&config.logging.level, &config.logging.format);

    match cli.command {
        Commands::Codename => cmd_codename(&config),
        Commands::Display { identifier } => cmd_display(&config, &identifier),
        Commands::Hash { codename } => cmd_hash(&config, codename),
        Commands::Keygen { new, codename } => cmd_keygen(&config, new, codename),
        Commands::Fingerprint { identifier } => cmd_fingerprint(&config, &identifier),
        Commands::Encrypt {
            to,
            input,
            output,
            filename,
        } => cmd_encrypt(
            &config,
            &to,
            input.as_deref(),
            output.as_deref(),
            filename.as_deref(),
        ),
        Commands::Decrypt {
            identifier,
            input,
            output,
            codename,
        } => cmd_decrypt(&config, &identifier, input.as_deref(), output.as_deref(), codename),
        Commands::Erase { path } => cmd_erase(&config, &path),
        Commands::Check => cmd_check(&config),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_words(config: &DeaddropConfig) -> Result<WordList> {
    match &config.expanded().identity.word_list {
        Some(path) => WordList::load(path).context("loading word list"),
        None => Ok(WordList::bip39_english()),
    }
}

fn load_hasher(config: &DeaddropConfig) -> Result<IdentityHasher> {
    let secret = find_hmac_secret(&config.expanded().identity)?;
    Ok(IdentityHasher::new(&secret.secret))
}

fn bootstrap(config: &DeaddropConfig) -> Result<CryptoServices> {
    CryptoServices::bootstrap(config).context("starting crypto services")
}

/// Codename from the flag/env, else an interactive prompt.
fn read_codename(provided: Option<String>) -> Result<Codename> {
    let raw = match provided {
        Some(raw) => raw,
        None => rpassword::prompt_password("Codename: ").context("reading codename")?,
    };
    Ok(Codename::from_secret(SecretString::from(raw.trim().to_string())))
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match path {
        Some(path) => {
            data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut data)
                .context("reading stdin")?;
        }
    }
    Ok(data)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_codename(config: &DeaddropConfig) -> Result<()> {
    let words = load_words(config)?;
    println!("{}", words.random_codename().expose());
    Ok(())
}

fn cmd_display(config: &DeaddropConfig, identifier: &str) -> Result<()> {
    let identifier: Identifier = identifier.parse().context("parsing identifier")?;
    let words = load_words(config)?;
    println!("{}", words.display_codename(&identifier));
    Ok(())
}

fn cmd_hash(config: &DeaddropConfig, codename: Option<String>) -> Result<()> {
    let hasher = load_hasher(config)?;
    let codename = read_codename(codename)?;
    println!("{}", hasher.stable_hash(codename.expose()));
    Ok(())
}

fn cmd_keygen(config: &DeaddropConfig, new: bool, codename: Option<String>) -> Result<()> {
    let services = bootstrap(config)?;
    let codename = if new {
        let codename = services.words.random_codename();
        eprintln!("New codename (shown once, store it safely):");
        println!("{}", codename.expose());
        codename
    } else {
        read_codename(codename)?
    };

    let identifier = services.hasher.stable_hash(codename.expose());
    let fingerprint = services
        .keypairs
        .ensure_keypair(identifier.as_str(), codename.secret())
        .context("provisioning keypair")?;

    println!("identifier:  {identifier}");
    println!("display:     {}", services.words.display_codename(&identifier));
    println!("fingerprint: {fingerprint}");
    Ok(())
}

fn cmd_fingerprint(config: &DeaddropConfig, identifier: &str) -> Result<()> {
    let services = bootstrap(config)?;
    match services.keypairs.lookup_fingerprint(identifier)? {
        Some(fingerprint) => {
            println!("{fingerprint}");
            Ok(())
        }
        None => anyhow::bail!("no keypair for identifier {identifier}"),
    }
}

fn cmd_encrypt(
    config: &DeaddropConfig,
    to: &str,
    input: Option<&Path>,
    output: Option<&Path>,
    filename: Option<&str>,
) -> Result<()> {
    let services = bootstrap(config)?;
    let fingerprint = services
        .keypairs
        .lookup_fingerprint(to)?
        .with_context(|| format!("no keypair for identifier {to}"))?;

    let ciphertext = match input {
        Some(path) => {
            let mut file = std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            services.gateway.encrypt(
                fingerprint.as_str(),
                Payload::Stream(&mut file),
                output,
                filename,
            )?
        }
        None => {
            let data = read_input(None)?;
            services
                .gateway
                .encrypt(fingerprint.as_str(), Payload::Bytes(&data), output, filename)?
        }
    };

    match ciphertext {
        Ciphertext::Inline(bytes) => std::io::stdout()
            .write_all(&bytes)
            .context("writing ciphertext")?,
        Ciphertext::Written(path) => eprintln!("wrote {}", path.display()),
    }
    Ok(())
}

fn cmd_decrypt(
    config: &DeaddropConfig,
    identifier: &str,
    input: Option<&Path>,
    output: Option<&Path>,
    codename: Option<String>,
) -> Result<()> {
    let services = bootstrap(config)?;
    let ciphertext = read_input(input)?;
    let codename = read_codename(codename)?;

    let plaintext = services
        .gateway
        .decrypt(identifier, codename.secret(), &ciphertext)?;
    if let Some(name) = &plaintext.filename {
        eprintln!("original filename: {name}");
    }

    match output {
        Some(path) => std::fs::write(path, &plaintext.data)
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&plaintext.data)
            .context("writing plaintext")?,
    }
    Ok(())
}

fn cmd_erase(config: &DeaddropConfig, path: &Path) -> Result<()> {
    let services = bootstrap(config)?;
    let absolute = std::path::absolute(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    services.eraser.secure_delete(&absolute)?;
    println!("erased {}", absolute.display());
    Ok(())
}

fn cmd_check(config: &DeaddropConfig) -> Result<()> {
    let services = bootstrap(config)?;
    println!("engine:      {}", services.engine().name());
    println!("eraser:      {}", services.eraser.program().display());
    println!("store root:  {}", services.store.root().display());
    println!("word list:   {} words", services.words.len());
    println!("pseudo-domain: {}", services.keypairs.pseudo_domain());
    println!("ok");
    Ok(())
}

fn cmd_config_show(config: &DeaddropConfig, config_path: &Path) -> Result<()> {
    print!("{}", render_config(config, config_path)?);
    Ok(())
}

fn render_config(config: &DeaddropConfig, config_path: &Path) -> Result<String> {
    let header = if config_path.exists() {
        format!("# Configuration from: {}", config_path.display())
    } else {
        format!("# Configuration: defaults (no file at {})", config_path.display())
    };
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    Ok(format!("{header}\n\n{rendered}"))
}
