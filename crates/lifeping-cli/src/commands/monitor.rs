use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use lifeping_core::{Scheduler, TickTarget};

use super::{print_json, runtime, CmdResult, UserContext};

#[derive(Subcommand)]
pub enum MonitorAction {
    /// Run the monitor in the foreground until interrupted
    Run {
        /// How often to re-read preferences changed by other commands
        #[arg(long, default_value = "30")]
        reload_secs: u64,
    },
    /// Run a single monitor cycle and print the resulting state
    Tick {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: MonitorAction) -> CmdResult {
    let ctx = UserContext::load()?;

    match action {
        MonitorAction::Run { reload_secs } => {
            let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(run_until_interrupted(ctx, Duration::from_secs(reload_secs.max(1))))
        }
        MonitorAction::Tick { json } => {
            let monitor = ctx.monitor()?;
            let state = runtime()?.block_on(monitor.on_tick())?;
            if json {
                print_json(&state)?;
            } else {
                let due = state.next_deadline_at.format("%Y-%m-%d %H:%M UTC");
                println!("{} (next check-in due {due})", state.status.label());
            }
            Ok(())
        }
    }
}

async fn run_until_interrupted(ctx: UserContext, reload_every: Duration) -> CmdResult {
    let monitor = Arc::new(ctx.monitor()?);
    // Catch up on deadlines that passed while nothing was running.
    monitor.tick().await;

    let scheduler = Scheduler::new(monitor.clone());
    let mut armed = ctx.prefs.get();
    scheduler.arm(&armed.schedule)?;
    tracing::info!(user = %ctx.session.email, "monitor running; press Ctrl-C to stop");

    let mut prefs_rx = ctx.prefs.subscribe();
    let mut reload = tokio::time::interval(reload_every);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            _ = reload.tick() => {
                if let Err(e) = ctx.prefs.reload() {
                    tracing::warn!("could not reload preferences: {e}");
                }
            }
            changed = prefs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = prefs_rx.borrow_and_update().clone();
                if latest.schedule != armed.schedule {
                    scheduler.arm(&latest.schedule)?;
                }
                if latest.alerts != armed.alerts {
                    tracing::warn!(
                        "alert delivery settings changed; restart the monitor to apply them"
                    );
                }
                armed = latest;
            }
        }
    }

    // A tick in progress finishes its delivery round before we exit.
    scheduler.shutdown().await?;
    Ok(())
}
