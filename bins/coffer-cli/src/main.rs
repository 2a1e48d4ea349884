//! coffer-cli: command-line front end for Coffer wallets.
//!
//! Every subcommand loads the wallet file, performs one operation through
//! the wallet facade, and saves the file back when state changed. PSBTs
//! travel as hex strings on stdout/stdin.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use coffer_core::address::Address;
use coffer_core::constants::COIN;
use coffer_core::types::OutPoint;
use coffer_wallet::{
    CustodyStatus, FeeRate, PaymentRequest, Recipient, Seed, UnspentOutput, Wallet, WalletConfig,
};

/// Coffer command-line wallet interface.
#[derive(Parser)]
#[command(name = "coffer-cli")]
#[command(version, about = "Coin selection, PSBT signing and key custody for Coffer wallets")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to wallet file (default: <data_dir>/wallet.dat).
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet.
    Create(CreateArgs),
    /// Issue a fresh receive address.
    Address,
    /// Show balances from the stored UTXO snapshot.
    Balance,
    /// Apply a chain update from a JSON file.
    ImportUtxos(ImportArgs),
    /// Draft a payment and print it as a PSBT.
    Send(SendArgs),
    /// Add this wallet's signatures to a PSBT.
    SignPsbt(PsbtArg),
    /// Merge the signatures of two PSBTs for the same draft.
    CombinePsbt(CombineArgs),
    /// Finalize a fully signed PSBT into a raw transaction.
    FinalizePsbt(PsbtArg),
    /// Encrypt the wallet's key material with a passphrase.
    Encrypt,
    /// Change the encryption passphrase.
    ChangePassphrase,
    /// Exclude an output from coin selection.
    Freeze(OutPointArg),
    /// Make a frozen output spendable again.
    Unfreeze(OutPointArg),
}

#[derive(Args)]
struct CreateArgs {
    /// Hex-encoded seed (32 bytes) to restore from instead of a random one.
    #[arg(long)]
    seed: Option<String>,

    /// Encrypt the new wallet right away.
    #[arg(long)]
    encrypt: bool,
}

#[derive(Args)]
struct ImportArgs {
    /// JSON file: {"added": [...], "spent": ["txid:index", ...]}.
    file: PathBuf,
}

#[derive(Args)]
struct SendArgs {
    /// Recipient address.
    #[arg(short, long)]
    to: String,

    /// Amount in minor units.
    #[arg(short, long)]
    amount: u64,

    /// Fee rate in minor units per 1000 bytes (default from config).
    #[arg(long)]
    fee_rate: Option<u64>,

    /// Spend exactly these outputs (txid:index); repeatable.
    #[arg(long = "coin")]
    coins: Vec<String>,
}

#[derive(Args)]
struct PsbtArg {
    /// Hex PSBT, or "-" to read from stdin.
    psbt: String,
}

#[derive(Args)]
struct CombineArgs {
    a: String,
    b: String,
}

#[derive(Args)]
struct OutPointArg {
    /// Output as txid:index.
    outpoint: String,
}

/// Chain update as accepted by `import-utxos`.
#[derive(Deserialize)]
struct UtxoUpdate {
    #[serde(default)]
    added: Vec<UtxoRecord>,
    #[serde(default)]
    spent: Vec<String>,
}

#[derive(Deserialize)]
struct UtxoRecord {
    outpoint: String,
    value: u64,
    address: Address,
    confirmations: u32,
    #[serde(default)]
    change: bool,
}

struct CliContext {
    config: WalletConfig,
    wallet_path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = WalletConfig::load(cli.global.config.as_deref()).context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = CliContext {
        wallet_path: cli.global.wallet.unwrap_or_else(|| config.wallet_path()),
        config,
    };

    match cli.command {
        Commands::Create(args) => wallet_create(&ctx, args),
        Commands::Address => wallet_address(&ctx),
        Commands::Balance => wallet_balance(&ctx),
        Commands::ImportUtxos(args) => import_utxos(&ctx, args),
        Commands::Send(args) => send(&ctx, args),
        Commands::SignPsbt(args) => sign_psbt(&ctx, args),
        Commands::CombinePsbt(args) => combine_psbt(&ctx, args),
        Commands::FinalizePsbt(args) => finalize_psbt(&ctx, args),
        Commands::Encrypt => encrypt(&ctx),
        Commands::ChangePassphrase => change_passphrase(&ctx),
        Commands::Freeze(args) => set_frozen(&ctx, args, true),
        Commands::Unfreeze(args) => set_frozen(&ctx, args, false),
    }
}

/// Create a new wallet, printing its seed once.
fn wallet_create(ctx: &CliContext, args: CreateArgs) -> Result<()> {
    if ctx.wallet_path.exists() {
        bail!("Wallet file already exists: {}", ctx.wallet_path.display());
    }

    let seed = match args.seed {
        Some(hex_seed) => parse_seed(&hex_seed)?,
        None => Seed::generate(),
    };
    let seed_hex = hex::encode(seed.as_bytes());
    let wallet = Wallet::from_seed(seed, ctx.config.clone());
    let address = wallet.next_address().context("Failed to derive first address")?;

    if args.encrypt {
        let passphrase = prompt_new_passphrase()?;
        wallet.encrypt(passphrase.as_bytes()).context("Failed to encrypt wallet")?;
    }
    save(&wallet, &ctx.wallet_path)?;

    println!("\n=== WALLET CREATED ===");
    println!("Network: {}", wallet.network());
    println!("First address: {address}");
    println!("\nSEED (hex): {seed_hex}");
    println!("\nWARNING: This seed will NOT be shown again.");
    println!("Store it in a secure location. Anyone with this seed can access your funds.");
    println!("\nWallet saved to: {}", ctx.wallet_path.display());
    Ok(())
}

/// Issue the next receive address.
fn wallet_address(ctx: &CliContext) -> Result<()> {
    let wallet = open(ctx)?;
    let address = match wallet.next_address() {
        Ok(address) => address,
        Err(coffer_wallet::WalletError::WalletLocked) => {
            with_unlocked(ctx, &wallet, || Ok(wallet.next_address()?))?
        }
        Err(e) => return Err(e).context("Failed to issue address"),
    };
    save(&wallet, &ctx.wallet_path)?;
    println!("{address}");
    Ok(())
}

fn wallet_balance(ctx: &CliContext) -> Result<()> {
    let wallet = open(ctx)?;
    let balance = wallet.balance();

    println!("\n=== WALLET BALANCE ===");
    println!("Network: {}", wallet.network());
    println!("Custody: {}", wallet.custody_status());
    println!("UTXOs: {}", balance.utxo_count);
    println!();
    println!("Confirmed:            {}", format_amount(balance.confirmed));
    println!("Unconfirmed change:   {}", format_amount(balance.unconfirmed_change));
    println!("Unconfirmed incoming: {}", format_amount(balance.unconfirmed_incoming));
    println!("Unspendable:          {}", format_amount(balance.unspendable));
    println!("Total:                {}", format_amount(balance.total()));
    Ok(())
}

/// Apply a chain update (stand-in for a sync backend).
fn import_utxos(ctx: &CliContext, args: ImportArgs) -> Result<()> {
    let wallet = open(ctx)?;
    let json = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let update: UtxoUpdate = serde_json::from_slice(&json).context("Invalid update JSON")?;

    let added = update
        .added
        .into_iter()
        .map(|r| {
            let outpoint = parse_outpoint(&r.outpoint)?;
            let utxo = UnspentOutput::new(outpoint, r.value, r.address, r.confirmations);
            Ok(if r.change { utxo.as_change() } else { utxo })
        })
        .collect::<Result<Vec<_>>>()?;
    let spent = update
        .spent
        .iter()
        .map(|s| parse_outpoint(s))
        .collect::<Result<Vec<_>>>()?;

    let (n_added, n_spent) = (added.len(), spent.len());
    wallet
        .ledger()
        .apply_update(added, &spent)
        .context("Failed to apply update")?;
    save(&wallet, &ctx.wallet_path)?;
    println!("Applied update: {n_added} added, {n_spent} spent, {} tracked", wallet.ledger().len());
    Ok(())
}

/// Draft a payment and print the unsigned PSBT.
fn send(ctx: &CliContext, args: SendArgs) -> Result<()> {
    let wallet = open(ctx)?;
    let recipient: Address = args.to.parse().context("Invalid recipient address")?;

    let mut request = PaymentRequest::new(vec![Recipient::new(recipient, args.amount)]);
    if let Some(rate) = args.fee_rate {
        request = request.with_fee_rate(FeeRate::from_per_kb(rate));
    }
    if !args.coins.is_empty() {
        let coins = args
            .coins
            .iter()
            .map(|s| parse_outpoint(s))
            .collect::<Result<Vec<_>>>()?;
        request = request.with_coins(coins);
    }

    let draft = match wallet.request_payment(&request) {
        Err(coffer_wallet::WalletError::WalletLocked) => {
            with_unlocked(ctx, &wallet, || Ok(wallet.request_payment(&request)?))?
        }
        other => other.context("Failed to draft payment")?,
    };
    let psbt = wallet.export_psbt(&draft).context("Failed to export PSBT")?;
    save(&wallet, &ctx.wallet_path)?;

    eprintln!("\n=== PAYMENT DRAFTED ===");
    eprintln!("TxID: {}", draft.txid());
    eprintln!("To: {recipient}");
    eprintln!("Amount: {}", format_amount(args.amount));
    eprintln!("Fee: {}", format_amount(draft.fee()));
    if let Some(index) = draft.change_index() {
        eprintln!("Change: {} (output {index})", format_amount(draft.change_amount()));
    }
    println!("{psbt}");
    Ok(())
}

fn sign_psbt(ctx: &CliContext, args: PsbtArg) -> Result<()> {
    let wallet = open(ctx)?;
    let payload = read_payload(&args.psbt)?;
    let signed = match wallet.custody_status() {
        CustodyStatus::Locked => with_unlocked(ctx, &wallet, || Ok(wallet.import_and_sign_psbt(&payload)?))?,
        _ => wallet.import_and_sign_psbt(&payload).context("Failed to sign PSBT")?,
    };
    println!("{signed}");
    Ok(())
}

fn combine_psbt(ctx: &CliContext, args: CombineArgs) -> Result<()> {
    let wallet = open(ctx)?;
    let combined = wallet
        .combine_psbt(&read_payload(&args.a)?, &read_payload(&args.b)?)
        .context("Failed to combine PSBTs")?;
    println!("{combined}");
    Ok(())
}

/// Print the raw transaction hex, ready for broadcast.
fn finalize_psbt(ctx: &CliContext, args: PsbtArg) -> Result<()> {
    let wallet = open(ctx)?;
    let tx = wallet
        .finalize_psbt(&read_payload(&args.psbt)?)
        .context("Failed to finalize PSBT")?;
    let raw = tx.serialize().context("Failed to serialize transaction")?;
    eprintln!("TxID: {}", tx.txid());
    println!("{}", hex::encode(raw));
    Ok(())
}

fn encrypt(ctx: &CliContext) -> Result<()> {
    let wallet = open(ctx)?;
    let passphrase = prompt_new_passphrase()?;
    wallet.encrypt(passphrase.as_bytes()).context("Failed to encrypt wallet")?;
    save(&wallet, &ctx.wallet_path)?;
    println!("Wallet encrypted. It is now locked.");
    Ok(())
}

fn change_passphrase(ctx: &CliContext) -> Result<()> {
    let wallet = open(ctx)?;
    let old = prompt_password("Current passphrase")?;
    let new = prompt_new_passphrase()?;
    wallet
        .change_passphrase(old.as_bytes(), new.as_bytes())
        .context("Failed to change passphrase")?;
    save(&wallet, &ctx.wallet_path)?;
    println!("Passphrase changed.");
    Ok(())
}

fn set_frozen(ctx: &CliContext, args: OutPointArg, frozen: bool) -> Result<()> {
    let wallet = open(ctx)?;
    let outpoint = parse_outpoint(&args.outpoint)?;
    if frozen {
        wallet.ledger().freeze(&outpoint)
    } else {
        wallet.ledger().unfreeze(&outpoint)
    }
    .with_context(|| format!("Failed to update {outpoint}"))?;
    save(&wallet, &ctx.wallet_path)?;
    println!("{outpoint} {}", if frozen { "frozen" } else { "unfrozen" });
    Ok(())
}

/// Prompt for the passphrase, unlock for the configured timeout, run `f`,
/// and lock again regardless of the outcome.
fn with_unlocked<T>(ctx: &CliContext, wallet: &Wallet, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let passphrase = prompt_password("Wallet passphrase")?;
    let timeout = Duration::from_secs(ctx.config.unlock_timeout_secs);
    wallet
        .unlock(passphrase.as_bytes(), Some(timeout))
        .context("Failed to unlock wallet")?;
    let result = f();
    wallet.lock().context("Failed to lock wallet")?;
    result
}

fn open(ctx: &CliContext) -> Result<Wallet> {
    Wallet::load(&ctx.wallet_path, ctx.config.clone())
        .with_context(|| format!("Failed to load wallet: {}", ctx.wallet_path.display()))
}

fn save(wallet: &Wallet, path: &Path) -> Result<()> {
    wallet
        .save(path)
        .with_context(|| format!("Failed to save wallet: {}", path.display()))
}

/// Read a PSBT argument, taking "-" to mean stdin.
fn read_payload(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.trim().to_string());
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read PSBT from stdin")?;
    Ok(buf.trim().to_string())
}

fn parse_outpoint(s: &str) -> Result<OutPoint> {
    s.parse::<OutPoint>()
        .with_context(|| format!("Invalid outpoint '{s}' (expected txid:index)"))
}

fn parse_seed(input: &str) -> Result<Seed> {
    let seed_bytes = hex::decode(input.trim()).context("Invalid hex seed")?;
    let seed_array: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Seed must be exactly 32 bytes (64 hex characters)"))?;
    Ok(Seed::from_bytes(seed_array))
}

/// Prompt for a password securely (no echo).
fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read passphrase")
}

fn prompt_new_passphrase() -> Result<String> {
    let passphrase = prompt_password("New passphrase")?;
    let confirm = prompt_password("Confirm passphrase")?;
    if passphrase != confirm {
        bail!("Passphrases do not match");
    }
    if passphrase.is_empty() {
        bail!("Passphrase must not be empty");
    }
    Ok(passphrase)
}

/// Amount in whole coins with minor units, for display only.
fn format_amount(units: u64) -> String {
    format!("{}.{:08} ({units} units)", units / COIN, units % COIN)
}
