use clap::Subcommand;
use lifeping_core::ContactDraft;

use super::{print_json, CmdResult, UserContext};

#[derive(Subcommand)]
pub enum ContactAction {
    /// Add a trusted contact
    Add {
        name: String,
        #[arg(long, default_value = "")]
        relationship: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
    },
    /// List trusted contacts
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a contact
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        relationship: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Remove a contact
    Remove {
        id: i64,
    },
}

pub fn run(action: ContactAction) -> CmdResult {
    let ctx = UserContext::load()?;
    let contacts = ctx.contacts()?;

    match action {
        ContactAction::Add {
            name,
            relationship,
            email,
            phone,
        } => {
            let draft = ContactDraft::new(name)
                .relationship(relationship)
                .email(email)
                .phone(phone);
            let contact = contacts.add(draft)?;
            if !contact.is_actionable() {
                eprintln!("warning: contact has no email or phone and will not be alerted");
            }
            println!("Contact added: {} (id {})", contact.name, contact.id);
        }
        ContactAction::List { json } => {
            let list = contacts.list()?;
            if json {
                print_json(&list)?;
            } else if list.is_empty() {
                println!("No trusted contacts. Add one with `lifeping contact add`.");
            } else {
                for c in &list {
                    let reach = [c.email.as_str(), c.phone_number.as_str()]
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!("{:>4}  {}  [{}]  {}", c.id, c.name, c.relationship, reach);
                }
            }
        }
        ContactAction::Update {
            id,
            name,
            relationship,
            email,
            phone,
        } => {
            let mut contact = contacts.get(id)?.ok_or_else(|| format!("contact {id} not found"))?;
            if let Some(name) = name {
                contact.name = name;
            }
            if let Some(relationship) = relationship {
                contact.relationship = relationship;
            }
            if let Some(email) = email {
                contact.email = email;
            }
            if let Some(phone) = phone {
                contact.phone_number = phone;
            }
            contacts.update(&contact)?;
            println!("Contact {id} updated");
        }
        ContactAction::Remove { id } => {
            contacts.delete(id)?;
            println!("Contact {id} removed");
        }
    }
    Ok(())
}
