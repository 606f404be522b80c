//! hwsend command line.
//!
//! Drives the library against a Ledger-compatible device speaking the
//! Speculos APDU protocol over TCP.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

use hwsend::bridge::{
    BridgeOrchestrator, BridgeOutcome, BridgeRequest, CircleIntentService, IntentLedger, IntentService,
    OnChainLeg, TransferIntent,
};
use hwsend::chains::ChainRegistry;
use hwsend::config::AppConfig;
use hwsend::hardware::{AddressCache, SignerSession, TcpConnector};
use hwsend::pipeline::{validate_request, SendPipeline, TransferRequest};
use hwsend::resolver::{EnsNameService, Resolver};
use hwsend::rpc::{ChainRpc, HttpChainRpc};
use hwsend::types::FeeUnit;
use hwsend::utils::logging::init_tracing;
use hwsend::{to_checksum_address, ErrorCode, SendError};

#[derive(Parser, Debug)]
#[command(name = "hwsend", author, version, about = "Hardware-signed transfers across EVM chains")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON; logs on stderr become JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured chains
    Chains,
    /// Resolve a name or address for a chain
    Resolve {
        recipient: String,
        /// Chain id or key, e.g. 84532 or BASE-SEPOLIA
        #[arg(long)]
        chain: String,
    },
    /// Connect the device and show its account
    Address,
    /// Sign and broadcast a native transfer
    Send(TransferArgs),
    /// Register a transfer intent and run its on-chain leg
    Bridge {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Wallet reference at the intent service
        #[arg(long)]
        source_wallet: String,
    },
    /// Show a recorded bridge intent
    BridgeStatus {
        intent_id: Uuid,
        /// Ask the intent service for the current status first
        #[arg(long)]
        refresh: bool,
    },
    /// Finish the on-chain leg of a recorded bridge intent
    BridgeRetry {
        intent_id: Uuid,
        /// Return right after broadcast
        #[arg(long)]
        no_wait: bool,
    },
    /// Show the cached account, without touching the device
    Status,
    /// Delete the cached account
    Forget,
}

#[derive(Args, Debug)]
struct TransferArgs {
    #[arg(long)]
    chain: String,
    /// Name or native address
    #[arg(long)]
    to: String,
    /// Decimal amount of the native asset
    #[arg(long)]
    amount: String,
    /// Gas price or fee cap; quoted from the chain when absent
    #[arg(long)]
    fee_per_unit: Option<String>,
    #[arg(long, default_value = "gwei")]
    fee_unit: FeeUnit,
    #[arg(long)]
    fee_limit: Option<u64>,
    /// Return right after broadcast
    #[arg(long)]
    no_wait: bool,
}

/// Long-lived pieces shared by the commands
struct App {
    config: AppConfig,
    registry: Arc<ChainRegistry>,
    rpc: Arc<dyn ChainRpc>,
    resolver: Arc<Resolver>,
}

impl App {
    fn new(config: AppConfig) -> Result<Self, SendError> {
        let registry = Arc::new(config.registry()?);
        let rpc: Arc<dyn ChainRpc> = Arc::new(HttpChainRpc::new(config.http_timeouts())?);
        let names = match &config.naming.registry {
            Some(address) => EnsNameService::with_registry(rpc.clone(), address)?,
            None => EnsNameService::new(rpc.clone())?,
        };
        let resolver = Arc::new(Resolver::new(registry.clone(), Arc::new(names), config.name_grammar()));
        Ok(Self {
            config,
            registry,
            rpc,
            resolver,
        })
    }

    fn cache(&self) -> Option<AddressCache> {
        self.config.cache_path().map(AddressCache::new)
    }

    fn session(&self) -> Result<SignerSession, SendError> {
        let connector = Arc::new(TcpConnector::new(self.config.device.endpoint.clone()));
        let session = SignerSession::new(connector, self.config.derivation_path()?)
            .with_timeouts(self.config.session_timeouts());
        Ok(match self.cache() {
            Some(cache) => session.with_cache(cache),
            None => session,
        })
    }

    /// Orchestrator over the persisted intent ledger
    async fn bridge<'s>(&self, session: &'s SignerSession, wait: bool) -> Result<BridgeOrchestrator<'s>, SendError> {
        let api_key = self.config.bridge.api_key.clone().unwrap_or_default();
        let service: Arc<dyn IntentService> = Arc::new(CircleIntentService::new(
            self.config.intent_base_url()?,
            api_key,
            self.config.http_timeouts(),
        )?);
        let mut settings = self.config.bridge_settings();
        settings.wait_for_confirmation = wait;
        BridgeOrchestrator::new(self.pipeline(session), service, settings)
            .with_ledger(IntentLedger::new(self.config.ledger_path()?))
            .await
    }

    fn pipeline<'s>(&self, session: &'s SignerSession) -> SendPipeline<'s> {
        SendPipeline::new(
            self.registry.clone(),
            self.resolver.clone(),
            self.rpc.clone(),
            session,
            self.config.pipeline_settings(),
        )
    }
}

impl TransferArgs {
    /// Build and check the request before the device is touched
    fn request(&self, registry: &ChainRegistry, default_fee_limit: u64) -> Result<TransferRequest, SendError> {
        let chain = registry.lookup(&self.chain)?;
        let mut request = TransferRequest::new(chain.chain_id, &self.to, &self.amount);
        request.fee_per_unit = self.fee_per_unit.clone();
        request.fee_unit = self.fee_unit;
        request.fee_limit = self.fee_limit;
        request.wait = !self.no_wait;
        validate_request(chain, &request, default_fee_limit)?;
        Ok(request)
    }
}

#[derive(Serialize)]
struct ChainRow<'a> {
    chain_id: u64,
    key: &'a str,
    symbol: &'a str,
    transactable: bool,
    rpc: &'a str,
}

fn print<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value).context("render output")?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

async fn run(cli: &Cli, ctx: &App) -> anyhow::Result<()> {
    match &cli.command {
        Command::Chains => {
            let rows: Vec<_> = ctx
                .registry
                .iter()
                .map(|c| ChainRow {
                    chain_id: c.chain_id,
                    key: &c.key,
                    symbol: &c.native_asset_symbol,
                    transactable: c.is_transactable(),
                    rpc: c.rpc_endpoint.as_str(),
                })
                .collect();
            print(cli.json, &rows, || {
                rows.iter()
                    .map(|r| {
                        let mode = if r.transactable { "send" } else { "resolve-only" };
                        format!("{:<12} {:>10}  {:<4} {:<12} {}", r.key, r.chain_id, r.symbol, mode, r.rpc)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Resolve { recipient, chain } => {
            let chain = ctx.registry.lookup(chain)?;
            let resolved = ctx.resolver.resolve(recipient, chain.chain_id).await?;
            print(cli.json, &resolved, || resolved.display_form().to_string())
        }
        Command::Address => {
            let session = ctx.session()?;
            let address = session.connect().await?;
            let shown = to_checksum_address(address.as_bytes());
            print(
                cli.json,
                &serde_json::json!({
                    "address": shown,
                    "derivation_path": session.derivation_path().to_string(),
                }),
                || shown.clone(),
            )
        }
        Command::Send(args) => {
            let request = args.request(&ctx.registry, ctx.config.rpc.default_fee_limit)?;
            let session = ctx.session()?;
            session.connect().await?;
            let outcome = ctx.pipeline(&session).send(&request).await?;
            print(cli.json, &outcome, || {
                format!("{:?}\n{}", outcome.tx_hash, outcome.explorer_url)
            })
        }
        Command::Bridge { transfer, source_wallet } => {
            let request = transfer.request(&ctx.registry, ctx.config.rpc.default_fee_limit)?;
            let mut bridge_request =
                BridgeRequest::new(source_wallet, request.chain_id, request.recipient, request.amount);
            bridge_request.fee_per_unit = request.fee_per_unit;
            bridge_request.fee_unit = request.fee_unit;
            bridge_request.fee_limit = request.fee_limit;

            let session = ctx.session()?;
            let bridge = ctx.bridge(&session, !transfer.no_wait).await?;
            session.connect().await?;
            let outcome = bridge.submit(&bridge_request).await?;
            print(cli.json, &outcome, || describe_outcome(&outcome))
        }
        Command::BridgeStatus { intent_id, refresh } => {
            let session = ctx.session()?;
            let bridge = ctx.bridge(&session, true).await?;
            let intent = if *refresh {
                bridge.poll_intent(*intent_id).await?
            } else {
                bridge.intent(*intent_id).ok_or_else(|| intent_not_found(*intent_id))?
            };
            print(cli.json, &intent, || describe_intent(&intent))
        }
        Command::BridgeRetry { intent_id, no_wait } => {
            let session = ctx.session()?;
            let bridge = ctx.bridge(&session, !no_wait).await?;
            let intent = bridge.intent(*intent_id).ok_or_else(|| intent_not_found(*intent_id))?;
            // only a fresh signature needs the device
            if intent.leg.can_attempt() {
                session.connect().await?;
            }
            let outcome = bridge.retry_onchain(*intent_id).await?;
            print(cli.json, &outcome, || describe_outcome(&outcome))
        }
        Command::Status => {
            let cached = match ctx.cache() {
                Some(cache) => cache.load().await?,
                None => None,
            };
            print(cli.json, &cached, || match &cached {
                Some(account) => format!("{} ({})", account.address, account.derivation_path),
                None => "no cached account".to_string(),
            })
        }
        Command::Forget => {
            if let Some(cache) = ctx.cache() {
                cache.clear().await?;
            }
            print(cli.json, &serde_json::json!({ "forgotten": true }), || "forgotten".to_string())
        }
    }
}

fn intent_not_found(intent_id: Uuid) -> SendError {
    SendError::new(ErrorCode::IntentNotFound, format!("No intent {} in the ledger", intent_id))
}

fn describe_intent(intent: &TransferIntent) -> String {
    let mut lines = vec![format!("intent {} ({:?})", intent.intent_id, intent.status)];
    let leg = match &intent.leg {
        OnChainLeg::NotAttempted => "not attempted".to_string(),
        OnChainLeg::InFlight => "in flight".to_string(),
        OnChainLeg::Unknown { .. } => "sent, outcome unknown (retry to settle)".to_string(),
        OnChainLeg::Broadcast { status, .. } => format!("broadcast, {:?}", status),
        OnChainLeg::Failed { code, message } => format!("failed ({:?}): {}", code, message),
    };
    lines.push(format!("on-chain leg: {}", leg));
    if let Some(hash) = intent.leg.tx_hash() {
        lines.push(format!("transaction: {:?}", hash));
    }
    lines.join("\n")
}

fn describe_outcome(outcome: &BridgeOutcome) -> String {
    let mut text = describe_intent(&outcome.intent);
    if outcome.duplicate {
        text.push_str("\nalready recorded, nothing sent");
    }
    if let Some(error) = &outcome.leg_error {
        text.push_str(&format!("\nleg error: {}", error));
    }
    text
}

fn report(json: bool, error: &anyhow::Error) {
    match error.downcast_ref::<SendError>() {
        Some(send_error) if json => match serde_json::to_string_pretty(&serde_json::json!({ "error": send_error })) {
            Ok(rendered) => println!("{}", rendered),
            Err(_) => eprintln!("error: {}", send_error),
        },
        _ => eprintln!("error: {:#}", error),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let result = async {
        let config = AppConfig::load(cli.config.as_deref())?;
        let ctx = App::new(config)?;
        run(&cli, &ctx).await
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(cli.json, &error);
            ExitCode::FAILURE
        }
    }
}
