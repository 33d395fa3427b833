use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cosign_transfer::signing::{canonicalize, RawSignature, TRANSFER_SCOPE};
use cosign_transfer::utils::{init_logging, LogFormat};
use cosign_transfer::{
    fees, parse_token_amount, ApiResponse, CanonicalSignature, CoreConfig, FeeTier, SourceAddress,
    TransferAmount, TransferIntent, TransferOrchestrator, TransferResult,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

/// Token transfers through a remote signer and a policy cosigner.
#[derive(Parser, Debug)]
#[command(name = "cosign-transfer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one transfer end to end
    Transfer {
        /// Core configuration file
        #[arg(long, env = "COSIGN_CONFIG")]
        config: PathBuf,
        /// Transfer intent as a JSON file; replaces the flags below
        #[arg(long, conflicts_with_all = ["source", "account", "destination", "amount"])]
        intent: Option<PathBuf>,
        /// Source as ADDRESS:DERIVATION_INDEX, repeatable
        #[arg(long, value_parser = parse_source)]
        source: Vec<SourceAddress>,
        /// Account id at the remote signer
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        destination: Option<String>,
        /// Decimal token amount, or "all"
        #[arg(long)]
        amount: Option<String>,
        /// The amount already includes the fee
        #[arg(long)]
        gross: bool,
    },
    /// Convert raw r/s into a canonical low-S DER signature
    Canonicalize {
        #[arg(long)]
        r: String,
        #[arg(long)]
        s: String,
        /// Sighash scope byte, decimal or 0x-prefixed
        #[arg(long, value_parser = parse_scope, default_value_t = TRANSFER_SCOPE)]
        scope: u8,
    },
    /// Resolve the fee for an amount against a tier table
    Fee {
        /// Tier table as JSON, e.g. [{"min":0,"max":100,"fee":1}]
        #[arg(long)]
        tiers: String,
        #[arg(long)]
        amount: u64,
    },
}

#[derive(Debug, Serialize)]
struct CanonicalOutput {
    signature: String,
    scope: u8,
    low_s: bool,
}

#[derive(Debug, Serialize)]
struct FeeOutput {
    amount: u64,
    fee: u64,
}

fn parse_source(value: &str) -> Result<SourceAddress, String> {
    let (address, index) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected ADDRESS:INDEX, got {}", value))?;
    let index = index
        .parse::<u32>()
        .map_err(|e| format!("bad derivation index {:?}: {}", index, e))?;
    Ok(SourceAddress::new(address, index))
}

fn parse_scope(value: &str) -> Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|e| format!("bad scope {:?}: {}", value, e))
}

fn emit<T: Serialize>(result: TransferResult<T>) -> ExitCode {
    let code = if result.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    println!("{}", ApiResponse::from(result).to_json());
    code
}

fn run_canonicalize(r: &str, s: &str, scope: u8) -> TransferResult<CanonicalOutput> {
    let signature = canonicalize(&RawSignature::new(r, s, 0), scope)?;
    let decoded = CanonicalSignature::parse(signature.as_bytes())?;
    Ok(CanonicalOutput {
        signature: signature.to_hex(),
        scope: signature.scope(),
        low_s: decoded.is_low_s(),
    })
}

fn run_fee(tiers: &str, amount: u64) -> TransferResult<FeeOutput> {
    let tiers: Vec<FeeTier> = serde_json::from_str(tiers)?;
    fees::validate_tiers(&tiers)?;
    let fee = fees::resolve_fee(&tiers, amount)?;
    Ok(FeeOutput { amount, fee })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Transfer {
            config,
            intent,
            source,
            account,
            destination,
            amount,
            gross,
        } => {
            let config = CoreConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            init_logging(&config.logging.level, config.logging.log_format());
            let orchestrator = TransferOrchestrator::from_config(&config)?;

            let intent = match intent {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading intent {}", path.display()))?;
                    serde_json::from_str::<TransferIntent>(&raw).context("parsing intent")?
                }
                None => {
                    let account = account.context("--account is required")?;
                    let destination = destination.context("--destination is required")?;
                    let amount = amount.context("--amount is required")?;
                    let amount = if amount.eq_ignore_ascii_case("all") {
                        TransferAmount::FullBalance
                    } else {
                        let token = orchestrator.token_config().await;
                        match token.and_then(|t| parse_token_amount(&amount, t.decimals)) {
                            Ok(units) => TransferAmount::Exact(units),
                            Err(e) => return Ok(emit::<()>(Err(e))),
                        }
                    };
                    TransferIntent::new(source, &account, &destination, amount).gross(gross)
                }
            };

            Ok(emit(orchestrator.transfer_tokens(&intent).await))
        }
        Commands::Canonicalize { r, s, scope } => {
            init_logging("warn", LogFormat::Pretty);
            Ok(emit(run_canonicalize(&r, &s, scope)))
        }
        Commands::Fee { tiers, amount } => {
            init_logging("warn", LogFormat::Pretty);
            Ok(emit(run_fee(&tiers, amount)))
        }
    }
}
