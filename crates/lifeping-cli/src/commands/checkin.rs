use chrono::Utc;
use clap::Subcommand;
use lifeping_core::storage::CheckInRecordStatus;
use lifeping_core::{compute_stats, format_countdown, CheckInLog, CheckInState};
use serde::Serialize;

use super::{print_json, runtime, CmdResult, UserContext};

#[derive(Subcommand)]
pub enum CheckinAction {
    /// Confirm you are safe
    Now {
        #[arg(long)]
        json: bool,
    },
    /// Show the deadline, status and countdown
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List past check-ins, newest first
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Total check-ins, day streak and missed check-ins
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct StatusView<'a> {
    #[serde(flatten)]
    state: &'a CheckInState,
    label: &'static str,
    countdown: String,
}

fn print_state(state: &CheckInState, json: bool) -> CmdResult {
    let countdown = format_countdown(state, Utc::now());
    if json {
        return print_json(&StatusView {
            state,
            label: state.status.label(),
            countdown,
        });
    }
    println!("Status:        {}", state.status.label());
    let due = state.next_deadline_at.format("%Y-%m-%d %H:%M UTC");
    println!("Next check-in: {due} ({countdown})");
    match state.last_check_in_at {
        Some(last) => println!("Last check-in: {}", last.format("%Y-%m-%d %H:%M UTC")),
        None => println!("Last check-in: never"),
    }
    Ok(())
}

pub fn run(action: CheckinAction) -> CmdResult {
    let ctx = UserContext::load()?;

    match action {
        CheckinAction::Now { json } => {
            let monitor = ctx.monitor()?;
            let receipt = runtime()?.block_on(monitor.check_in_now())?;
            if json {
                print_json(&receipt)?;
            } else {
                if receipt.record.status == CheckInRecordStatus::Late {
                    println!("Checked in (late).");
                } else {
                    println!("Checked in.");
                }
                print_state(&receipt.state, false)?;
            }
        }
        CheckinAction::Status { json } => {
            let monitor = ctx.monitor()?;
            let state = runtime()?.block_on(monitor.current_state())?;
            print_state(&state, json)?;
        }
        CheckinAction::History { limit, json } => {
            let history =
                ctx.with_db(|db| CheckInLog::new(db.conn(), &ctx.session.user_id).history(limit))?;
            if json {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("No check-ins yet.");
            } else {
                for record in &history {
                    let status = match record.status {
                        CheckInRecordStatus::Completed => "completed",
                        CheckInRecordStatus::Late => "late",
                    };
                    println!("{}  {status}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }
        CheckinAction::Stats { json } => {
            let stats =
                ctx.with_db(|db| compute_stats(db.conn(), &ctx.session.user_id, Utc::now()))?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Total check-ins:  {}", stats.total_check_ins);
                println!("Day streak:       {}", stats.streak_days);
                println!("Missed check-ins: {}", stats.missed_check_ins);
            }
        }
    }
    Ok(())
}
