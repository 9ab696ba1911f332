use clap::Subcommand;

use super::{print_json, CmdResult, UserContext};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a preference value
    Get {
        /// Dot-path key (e.g. "schedule.grace_period_ms", "ui.dark_theme")
        key: String,
    },
    /// Set a preference value
    Set {
        /// Dot-path key
        key: String,
        /// New value
        value: String,
    },
    /// List all preferences
    List,
    /// Reset preferences to defaults
    Reset,
    /// Switch between light and dark theme
    ToggleTheme,
}

pub fn run(action: ConfigAction) -> CmdResult {
    let ctx = UserContext::load()?;
    let prefs = &ctx.prefs;

    match action {
        ConfigAction::Get { key } => match prefs.get_key(&key) {
            Some(value) => println!("{value}"),
            None => return Err(format!("unknown key: {key}").into()),
        },
        ConfigAction::Set { key, value } => {
            prefs.set_key(&key, &value)?;
            println!("ok");
        }
        ConfigAction::List => print_json(&prefs.get())?,
        ConfigAction::Reset => {
            prefs.reset()?;
            println!("preferences reset to defaults");
        }
        ConfigAction::ToggleTheme => {
            let dark = prefs.toggle_theme()?;
            println!("theme: {}", if dark { "dark" } else { "light" });
        }
    }
    Ok(())
}
