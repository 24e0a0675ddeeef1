//! settle-runner: headless settlement runner for the commission engine.
//!
//! Usage:
//!   settle-runner --members members.json --orders orders.jsonl --workers 4 --db run.db
//!   settle-runner --db run.db --ipc-mode

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use commission_core::{
    balance::BalanceProjector,
    config::EngineConfig,
    event::OrderPaid,
    ledger_poster::FundsRequest,
    member::Member,
    orchestrator::{SettlementOrchestrator, SettlementReport},
    pool::SettlementPool,
    query::{DateRange, EngineQueries},
    store::SettlementStore,
    types::{EntryId, LedgerKind},
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    OrderPaid {
        order: OrderPaid,
    },
    GetBalance {
        member_id: String,
        kind: LedgerKind,
    },
    ListEntries {
        member_id: String,
        kind: LedgerKind,
        #[serde(default)]
        from: Option<DateTime<Utc>>,
        #[serde(default)]
        to: Option<DateTime<Utc>>,
        #[serde(default)]
        after: Option<EntryId>,
    },
    BadgeStatus {
        member_id: String,
    },
    Upline {
        member_id: String,
    },
    Withdraw {
        request: FundsRequest,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let workers = parse_arg(&args, "--workers", 4usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let members_path = flag_value(&args, "--members");
    let orders_path = flag_value(&args, "--orders");

    // A second connection to :memory: would see an empty database.
    let in_memory = db == ":memory:";
    if !ipc_mode {
        println!("settle-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  workers:   {}", workers_banner(in_memory, workers));
        println!();
    }

    let config = EngineConfig::load(data_dir)?;
    let store = if in_memory {
        SettlementStore::in_memory()?
    } else {
        SettlementStore::open_with_timeout(db, config.busy_timeout())?
    };
    store.migrate()?;

    if let Some(path) = members_path {
        let loaded = seed_members(&store, path)?;
        log::info!("seeded {loaded} members from {path}");
    }

    let orchestrator = SettlementOrchestrator::build(store, config);

    if ipc_mode {
        run_ipc_loop(&orchestrator)?;
        return Ok(());
    }

    let orders = match orders_path {
        Some(path) => read_orders(path)?,
        None => Vec::new(),
    };
    let pool = SettlementPool::new(&orchestrator, workers);
    let reports = pool.settle_all(orders)?;
    print_summary(&orchestrator, &reports)?;
    Ok(())
}

fn workers_banner(in_memory: bool, workers: usize) -> String {
    if in_memory && workers > 1 {
        format!("1 (requested {workers}; in-memory db settles sequentially)")
    } else {
        workers.to_string()
    }
}

fn seed_members(store: &SettlementStore, path: &str) -> Result<usize> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    let members: Vec<Member> =
        serde_json::from_str(&content).with_context(|| format!("Bad member list in {path}"))?;
    for m in &members {
        store.upsert_member(m)?;
    }
    Ok(members.len())
}

/// One `OrderPaid` JSON object per line; blank lines are skipped.
fn read_orders(path: &str) -> Result<Vec<OrderPaid>> {
    let file = std::fs::File::open(path).with_context(|| format!("Cannot read {path}"))?;
    let mut orders = Vec::new();
    for (n, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let order: OrderPaid = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: bad order", n + 1))?;
        orders.push(order);
    }
    Ok(orders)
}

fn run_ipc_loop(orchestrator: &SettlementOrchestrator) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(orchestrator, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(orchestrator: &SettlementOrchestrator, cmd: IpcCommand) -> Result<serde_json::Value> {
    let queries = EngineQueries::new(orchestrator.store(), orchestrator.locks(), orchestrator.config());
    let value = match cmd {
        IpcCommand::OrderPaid { order } => serde_json::to_value(orchestrator.settle(&order))?,
        IpcCommand::GetBalance { member_id, kind } => {
            let balance = queries.get_balance(&member_id, kind)?;
            serde_json::json!({ "member_id": member_id, "kind": kind, "balance": balance })
        }
        IpcCommand::ListEntries {
            member_id,
            kind,
            from,
            to,
            after,
        } => serde_json::to_value(queries.list_ledger_entries(
            &member_id,
            kind,
            DateRange { from, to },
            after,
        )?)?,
        IpcCommand::BadgeStatus { member_id } => serde_json::to_value(queries.badge_status(&member_id)?)?,
        IpcCommand::Upline { member_id } => {
            let holders: serde_json::Map<String, serde_json::Value> = queries
                .upline_chain(&member_id)?
                .into_iter()
                .map(|(tier, holder)| (tier.as_str().to_string(), serde_json::json!(holder)))
                .collect();
            serde_json::Value::Object(holders)
        }
        IpcCommand::Withdraw { request } => serde_json::to_value(orchestrator.poster().withdraw(&request)?)?,
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn print_summary(orchestrator: &SettlementOrchestrator, reports: &[SettlementReport]) -> Result<()> {
    let store = orchestrator.store();
    let settled = reports.iter().filter(|r| r.is_settled() && !r.already_settled).count();
    let skipped = reports.iter().filter(|r| r.already_settled).count();
    let failed: Vec<_> = reports.iter().filter(|r| !r.is_settled()).collect();
    let unlocks: usize = reports.iter().map(|r| r.badges.unlocks.len()).sum();

    println!("=== RUN SUMMARY ===");
    println!("  orders:         {}", reports.len());
    println!("  settled:        {settled}");
    println!("  already done:   {skipped}");
    println!("  failed:         {}", failed.len());
    println!("  badge unlocks:  {unlocks}");
    println!("  members:        {}", store.member_count()?);
    println!("  ledger rows:    {}", store.ledger_entry_count()?);
    for report in &failed {
        println!("    {} -> {}", report.order_id, report.state);
    }

    println!();
    println!("=== BALANCES ===");
    let projector = BalanceProjector::new(store, orchestrator.locks());
    for (member_id, kind) in store.balance_keys()? {
        println!("  {member_id:<16} {:<8} {}", kind.as_str(), projector.current_balance(&member_id, kind)?);
    }

    let mismatches = projector.audit()?;
    if !mismatches.is_empty() {
        println!();
        println!("=== CACHE MISMATCHES ===");
        for m in &mismatches {
            println!("  {} {} cached {} ledger {}", m.member_id, m.kind.as_str(), m.cached, m.ledger_sum);
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
