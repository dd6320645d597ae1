//! deep-yield CLI: manage opportunities and balances, plan rebalances, verify audits.

use clap::{Parser, Subcommand};
use deep_yield::audit::{reproducibility_hash, verify_audit_hash, PlanAudit};
use deep_yield::{
    AccountId, Amount, LedgerConfig, LedgerDb, LedgerError, OpportunityId, OpportunityStore,
    YieldEngine,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Add(args) => run_add(args),
        Command::Update(args) => run_update(args),
        Command::List(args) => run_list(args),
        Command::Deposit(args) => run_deposit(args),
        Command::Withdraw(args) => run_withdraw(args),
        Command::Balance(args) => run_balance(args),
        Command::Positions(args) => run_positions(args),
        Command::Check(args) => run_check(args),
        Command::Rebalance(args) => run_rebalance(args),
        Command::Best(args) => run_best(args),
        Command::Verify(args) => run_verify(args),
    }
}

#[derive(Parser)]
#[command(name = "deep-yield")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Yield-allocation ledger: opportunities, deposits, and rebalance plans")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new yield opportunity.
    Add(AddArgs),
    /// Refresh APY, TVL, and risk of an opportunity.
    Update(UpdateArgs),
    /// List all opportunities in creation order.
    List(StateArgs),
    /// Credit an account in an opportunity.
    Deposit(MoveArgs),
    /// Debit an account in an opportunity.
    Withdraw(MoveArgs),
    /// Show one account's balance in an opportunity.
    Balance(BalanceArgs),
    /// Show every non-zero position of an account.
    Positions(PositionsArgs),
    /// Print the allocation snapshot.
    Check(StateArgs),
    /// Print the rebalance plan and write an audit bundle.
    Rebalance(RebalanceArgs),
    /// Show the highest-APY opportunity above a threshold.
    Best(BestArgs),
    /// Verify an audit bundle's reproducibility hash.
    Verify(VerifyArgs),
}

#[derive(Parser)]
struct StateArgs {
    #[arg(long, default_value = "./data/state")]
    state_dir: PathBuf,
}

#[derive(Parser)]
struct AddArgs {
    #[arg(long)]
    protocol: String,
    #[arg(long)]
    apy: Decimal,
    #[arg(long)]
    tvl: u128,
    #[arg(long)]
    risk: u8,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct UpdateArgs {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    apy: Decimal,
    #[arg(long)]
    tvl: u128,
    #[arg(long)]
    risk: u8,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct MoveArgs {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    account: String,
    #[arg(long)]
    amount: u128,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct BalanceArgs {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    account: String,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct PositionsArgs {
    #[arg(long)]
    account: String,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct RebalanceArgs {
    #[arg(long, default_value = "./reports")]
    out_dir: PathBuf,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct BestArgs {
    /// Overrides `min_apy` from the config file.
    #[arg(long)]
    min_apy: Option<Decimal>,
    #[command(flatten)]
    state: StateArgs,
}

#[derive(Parser)]
struct VerifyArgs {
    #[arg(long)]
    bundle: PathBuf,
}

fn db_path(state_dir: &Path) -> PathBuf {
    state_dir.join("ledger.sqlite")
}

/// Open the state file and load it into an engine for reading.
fn open_engine(state: &StateArgs) -> Result<YieldEngine, Box<dyn std::error::Error>> {
    let config = LedgerConfig::load();
    let db = LedgerDb::open(db_path(&state.state_dir))?;
    let store = db.load(config.max_risk)?;
    Ok(YieldEngine::from_store(store, config)?)
}

/// Run `f` against the stored state and write the result back, all inside one
/// write transaction on the state file.
fn mutate<T>(
    state: &StateArgs,
    f: impl FnOnce(&YieldEngine) -> Result<T, LedgerError>,
) -> Result<T, Box<dyn std::error::Error>> {
    let config = LedgerConfig::load();
    let db = LedgerDb::open(db_path(&state.state_dir))?;
    db.update(
        config.max_risk,
        move |store: &mut OpportunityStore| -> Result<T, Box<dyn std::error::Error>> {
            let engine = YieldEngine::from_store(std::mem::take(store), config)?;
            let out = f(&engine);
            *store = engine.into_store()?;
            Ok(out?)
        },
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_add(args: AddArgs) -> Result<(), Box<dyn std::error::Error>> {
    let opp = mutate(&args.state, |engine| {
        engine.add_opportunity(&args.protocol, args.apy, Amount(args.tvl), args.risk)
    })?;
    print_json(&opp)
}

fn run_update(args: UpdateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let opp = mutate(&args.state, |engine| {
        engine.update_opportunity(OpportunityId(args.id), args.apy, Amount(args.tvl), args.risk)
    })?;
    print_json(&opp)
}

fn run_list(args: StateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args)?;
    let max_risk = engine.config().max_risk;
    let listed: Vec<_> = engine
        .get_opportunities()?
        .into_iter()
        .map(|o| {
            let risk_level = o.risk_level(max_risk);
            json!({ "opportunity": o, "risk_level": risk_level })
        })
        .collect();
    print_json(&listed)
}

fn run_deposit(args: MoveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let account = AccountId::from(args.account);
    let opp = mutate(&args.state, |engine| {
        engine.deposit(OpportunityId(args.id), &account, Amount(args.amount))
    })?;
    print_json(&opp)
}

fn run_withdraw(args: MoveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let account = AccountId::from(args.account);
    let opp = mutate(&args.state, |engine| {
        engine.withdraw(OpportunityId(args.id), &account, Amount(args.amount))
    })?;
    print_json(&opp)
}

fn run_balance(args: BalanceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args.state)?;
    let account = AccountId::from(args.account);
    let balance = engine.balance_of(OpportunityId(args.id), &account)?;
    print_json(&json!({ "opportunity_id": args.id, "account": account, "balance": balance }))
}

fn run_positions(args: PositionsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args.state)?;
    let account = AccountId::from(args.account);
    let positions: Vec<_> = engine
        .account_positions(&account)?
        .into_iter()
        .map(|(id, amount)| json!({ "opportunity_id": id, "amount": amount }))
        .collect();
    print_json(&json!({
        "account": account,
        "positions": positions,
        "ledger_total": engine.total_deposits()?,
    }))
}

fn run_check(args: StateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args)?;
    print_json(&engine.check_rebalance()?)
}

fn run_rebalance(args: RebalanceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args.state)?;
    let audit = engine.audit_rebalance()?;
    let hash = reproducibility_hash(&audit)?;
    std::fs::create_dir_all(&args.out_dir)?;
    let stamp = OffsetDateTime::now_utc().unix_timestamp();
    let bundle_path = args.out_dir.join(format!("rebalance-{}.audit.json", stamp));
    let hash_path = args.out_dir.join(format!("rebalance-{}.audit.sha256", stamp));
    std::fs::write(&bundle_path, serde_json::to_string_pretty(&audit)?)?;
    std::fs::write(&hash_path, format!("{}\n", hash))?;
    info!(?bundle_path, ?hash_path, %hash, "rebalance plan written");
    print_json(&audit.plan)
}

fn run_best(args: BestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(&args.state)?;
    match engine.best_opportunity(args.min_apy)? {
        Some(opp) => print_json(&opp),
        None => {
            info!("no opportunity above threshold");
            print_json(&serde_json::Value::Null)
        }
    }
}

fn run_verify(args: VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle_json = std::fs::read_to_string(&args.bundle)?;
    let audit: PlanAudit = serde_json::from_str(&bundle_json)?;
    let sha256_path = args.bundle.with_extension("sha256");
    let expected = std::fs::read_to_string(sha256_path)
        .ok()
        .map(|s| s.trim().to_string());
    let Some(expected) = expected else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected=None",
            reproducibility_hash(&audit)?
        );
        std::process::exit(1);
    };
    let result = verify_audit_hash(&audit, &expected)?;
    if result.matches {
        println!("OK\t{}", result.audit_hash);
    } else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected={:?}",
            result.audit_hash, result.expected_hash
        );
        std::process::exit(1);
    }
    Ok(())
}
