use color_eyre::eyre::Result;
use std::{
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::info;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use trail_client::{
    AppConfig,
    Command,
    Direction,
    EventKind,
    GameClient,
    InferredEvent,
    NotificationSink,
    PlayerId,
    TransientNotices,
    sim::{
        MoveOutcome,
        SimLedger,
    },
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn init_tracing() {
    let file = rolling::daily("logs", "trail-client.log");
    let (writer, guard) = tracing_appender::non_blocking(file);
    let _ = LOG_GUARD.set(guard);
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

/// Prints notices to the terminal as they are inferred, on top of the
/// self-expiring buffer.
struct ConsoleSink {
    notices: TransientNotices,
}

impl NotificationSink for ConsoleSink {
    fn notify(&mut self, event: InferredEvent) {
        match event.kind {
            EventKind::HazardFatal => {
                println!(">> A hazard ended the run. The pending reward is gone.");
            }
            EventKind::HazardDeflected => {
                println!(">> A hazard struck and the protection absorbed it.");
            }
        }
        self.notices.notify(event);
    }
}

fn arg_value(name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    std::env::args().find_map(|arg| arg.strip_prefix(&prefix).map(str::to_owned))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let seed = arg_value("seed").map(|s| s.parse()).transpose()?.unwrap_or(42);
    let latency_ms = arg_value("latency-ms")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(150u64);

    // Shorter delays than production so the scripted session finishes quickly.
    let config = AppConfig {
        poll_interval: Duration::from_secs(3),
        settlement_refetch_delay: Duration::from_millis(300),
        second_refetch_delay: Duration::from_millis(900),
        ..AppConfig::default()
    };
    let ledger =
        SimLedger::new(config.clone(), seed).with_latency(Duration::from_millis(latency_ms));
    let sink = ConsoleSink {
        notices: TransientNotices::new(),
    };
    let client = GameClient::new(
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        sink,
        PlayerId(String::from("demo-player")),
        config,
    );

    let (commands, receiver) = mpsc::unbounded_channel();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let loop_handle = tokio::task::spawn_local(client.run(receiver));
            tokio::select! {
                result = scripted_session(&commands, &ledger) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted; shutting down");
                    let _ = commands.send(Command::Shutdown);
                }
            }
            loop_handle.await?
        })
        .await
}

/// One full run against the simulated ledger: the start auto-raises the
/// authorization headroom, one hazard is deflected by protection, and the
/// reward is claimed at the end.
async fn scripted_session(
    commands: &mpsc::UnboundedSender<Command>,
    ledger: &SimLedger,
) -> Result<()> {
    let pause = Duration::from_millis(1500);
    ledger.script_moves(&[
        MoveOutcome::Reward(120),
        MoveOutcome::Hazard,
        MoveOutcome::Reward(300),
    ]);

    println!("Starting a run (no headroom yet, expect an authorization raise first)...");
    commands.send(Command::StartRun)?;
    time::sleep(pause).await;

    println!("Buying protection...");
    commands.send(Command::AcquireProtection)?;
    time::sleep(pause).await;

    println!("Moving right onto a reward tile...");
    commands.send(Command::Move(Direction::Right))?;
    time::sleep(pause).await;

    println!("Moving down onto a hazard tile...");
    commands.send(Command::Move(Direction::Down))?;
    time::sleep(pause).await;

    println!("Moving right onto another reward tile...");
    commands.send(Command::Move(Direction::Right))?;
    time::sleep(pause).await;

    println!("Ending the run and claiming...");
    commands.send(Command::EndAndClaim)?;
    time::sleep(pause).await;

    println!(
        "Session over. Claimed {} in total; {} headroom remains.",
        ledger.claimed_total(),
        ledger.headroom()
    );
    commands.send(Command::Shutdown)?;
    Ok(())
}
