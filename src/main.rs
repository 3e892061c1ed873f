//!
//! academic-chain CLI binary
//! -------------------------
//! Interactive client for the paper review service: sign in through the
//! identity provider, browse papers, submit papers and reviews. `--offline`
//! runs against an in-process service seeded with sample papers.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use academic_chain::actor::memory::{sample_paper, MemoryConnector, MemoryState};
use academic_chain::cache::QueryClient;
use academic_chain::cli::{print_error, print_output, run_line, Output, HELP};
use academic_chain::config::{arg_value, has_flag, Config};
use academic_chain::identity::{Identity, MemoryCredentialStore, Principal, StaticAuthProvider};
use academic_chain::AppContext;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [flags]                 start the interactive interpreter\n  {program} -q \"<command>\" [flags]   run one command and exit\n\nFlags:\n  --host <url>                 replica base URL (ACADEMIC_CHAIN_HOST, default http://127.0.0.1:4943)\n  --canister <id>              service canister id (ACADEMIC_CHAIN_CANISTER_ID)\n  --network <ic|local>         deployment; anything but ic fetches the replica root key (ACADEMIC_CHAIN_NETWORK)\n  --identity-provider <url>    login provider (ACADEMIC_CHAIN_IDENTITY_PROVIDER)\n  --state-dir <path>           where the credential is kept (ACADEMIC_CHAIN_STATE_DIR)\n  --offline                    use an in-process service with sample papers (ACADEMIC_CHAIN_OFFLINE)\n  -q, --query <command>        run a single command\n  -h, --help                   show this help\n\n{HELP}"
    );
}

/// In-process service with a few papers and an approving login.
fn offline_context(config: Config) -> AppContext {
    let state = MemoryState::new();
    let author = Principal::new("rdmx6-jaaaa-aaaaa-aaadq-cai");
    for (id, title) in [
        ("paper-1", "Consensus Under Partial Synchrony"),
        ("paper-2", "Incentives for Open Peer Review"),
        ("paper-3", "Citation Graphs as Reputation Signals"),
    ] {
        state.seed_paper(sample_paper(id, title, &author));
    }
    let identity = Identity {
        principal: Principal::new("offline-reviewer"),
        delegation: "offline-delegation".to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::hours(8),
    };
    AppContext::new(
        config,
        Arc::new(MemoryConnector::new(state)),
        Arc::new(StaticAuthProvider::approving(identity)),
        Arc::new(MemoryCredentialStore::new()),
    )
}

async fn collect_garbage_periodically(queries: QueryClient, every: Duration) {
    let mut tick = tokio::time::interval(every);
    loop {
        tick.tick().await;
        queries.collect_garbage();
    }
}

/// Entry point: one-shot command with -q, otherwise the interpreter.
fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    if has_flag(&args, "-h") || has_flag(&args, "--help") {
        print_usage(&program);
        return Ok(());
    }

    // Logs go to stderr so command output stays clean
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = Config::load(&args)?;
    let offline = config.offline;
    let query = arg_value(&args, "-q").or_else(|| arg_value(&args, "--query")).map(|s| s.to_string());
    info!(
        target: "academic_chain",
        "academic-chain starting: host={}, canister={}, network={:?}, offline={}, state_dir='{}'",
        config.host, config.canister_id, config.network, offline, config.state_dir.display()
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let gc_every = config.gc_time.max(Duration::from_secs(1));
    let ctx = if offline {
        offline_context(config)
    } else {
        AppContext::from_config(config)?
    };

    let mut errors = ctx.session().subscribe_errors();
    rt.spawn(async move {
        loop {
            match errors.recv().await {
                Ok(e) => print_error(&e),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
    rt.spawn(collect_garbage_periodically(ctx.queries().clone(), gc_every));
    rt.block_on(ctx.init());

    let result = match query {
        Some(q) => Ok(run_once(&rt, &ctx, &q)),
        None => run_repl(&rt, &ctx).map(|()| true),
    };
    ctx.shutdown();
    if !result? {
        std::process::exit(1);
    }
    Ok(())
}

/// Run a single command; false when it failed (the error is already printed).
fn run_once(rt: &tokio::runtime::Runtime, ctx: &AppContext, line: &str) -> bool {
    match rt.block_on(run_line(ctx, line)) {
        Ok(out) => {
            print_output(&out);
            true
        }
        Err(e) => {
            print_error(&e);
            false
        }
    }
}

fn run_repl(rt: &tokio::runtime::Runtime, ctx: &AppContext) -> Result<()> {
    let mut rl = DefaultEditor::new().context("Failed to start line editor")?;
    println!("academic-chain interpreter. Type 'help' for commands.");
    loop {
        match rl.readline("> ") {
            Ok(input) => {
                let line = input.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                match rt.block_on(run_line(ctx, line)) {
                    Ok(Output::Quit) => break,
                    Ok(out) => print_output(&out),
                    Err(e) => print_error(&e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        }
    }
    Ok(())
}
