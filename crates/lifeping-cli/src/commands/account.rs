use clap::Subcommand;
use lifeping_core::storage::data_dir;
use lifeping_core::{AccountStore, Database, PreferenceStore, Registration, SessionStore};

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Defaults to --password
        #[arg(long)]
        confirm_password: Option<String>,
    },
    /// Sign in to an existing account
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out on this device
    Logout,
    /// Show the signed-in session
    Whoami {
        #[arg(long)]
        json: bool,
    },
    /// Show the full profile
    Profile {
        #[arg(long)]
        json: bool,
    },
    /// Update name or bio
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
    /// Change the password of the signed-in account
    Passwd {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
    /// Delete the signed-in account and all of its data
    Delete {
        #[arg(long)]
        password: String,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: AccountAction) -> CmdResult {
    let db = Database::open()?;
    let accounts = AccountStore::new(&db);
    let sessions = SessionStore::new(&db);

    match action {
        AccountAction::Register {
            name,
            email,
            confirm_password,
            password,
        } => {
            let form = Registration {
                full_name: name,
                email,
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                password,
            };
            let profile = accounts.register(&form)?;
            sessions.save(&profile.session())?;
            println!("Registered and signed in as {} <{}>", profile.full_name, profile.email);
        }
        AccountAction::Login { email, password } => {
            let profile = accounts.login(&email, &password)?;
            sessions.save(&profile.session())?;
            println!("Signed in as {} <{}>", profile.full_name, profile.email);
        }
        AccountAction::Logout => {
            sessions.clear()?;
            println!("Signed out");
        }
        AccountAction::Whoami { json } => {
            let session = sessions.require()?;
            if json {
                print_json(&session)?;
            } else {
                println!("{} <{}>", session.display_name, session.email);
            }
        }
        AccountAction::Profile { json } => {
            let session = sessions.require()?;
            let profile = accounts
                .profile(&session.user_id)?
                .ok_or(lifeping_core::AuthError::StaleSession(session.user_id))?;
            if json {
                print_json(&profile)?;
            } else {
                println!("Name:    {}", profile.full_name);
                println!("Email:   {}", profile.email);
                println!("Bio:     {}", profile.bio);
                println!("Member since {}", profile.created_at.format("%Y-%m-%d"));
            }
        }
        AccountAction::Update { name, bio } => {
            let session = sessions.require()?;
            let profile = accounts.update_profile(&session, name.as_deref(), bio.as_deref())?;
            sessions.save(&profile.session())?;
            println!("Profile updated: {}", profile.full_name);
        }
        AccountAction::Passwd { current, new } => {
            let session = sessions.require()?;
            accounts.change_password(&session, &current, &new)?;
            println!("Password changed");
        }
        AccountAction::Delete { password, json } => {
            let session = sessions.require()?;
            let prefs = PreferenceStore::path_for(&data_dir()?, &session.user_id);
            let removal = accounts.delete_account(&session, &password, &prefs)?;
            if json {
                print_json(&removal)?;
            } else {
                println!(
                    "Deleted account {} ({} contacts, {} check-ins)",
                    session.email, removal.contacts, removal.check_ins
                );
            }
        }
    }
    Ok(())
}
