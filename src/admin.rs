//! Admin command surface over private chats and channel posts.
//!
//! Mutations write to the store first, then install the refreshed
//! configuration into [`SharedConfig`], so a restart always converges
//! to the same state the admins last saw.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::StorageError;
use crate::pipeline::rules::RuleSet;
use crate::routing::{ChannelRole, RoutingTable};
use crate::state::SharedConfig;
use crate::store::Store;
use crate::telegram::BotApi;
use crate::telegram::types::Message;

/// A parsed admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Start,
    Help,
    Map { source: i64, dest: i64 },
    Unmap { source: i64, dest: i64 },
    List,
    AddRule { pattern: String, replacement: String },
    DelRule { id: i64 },
    Rules,
}

const HELP_TEXT: &str = "Mirror relay commands:\n\
    /map <source_id> <dest_id> - mirror a source channel into a destination\n\
    /unmap <source_id> <dest_id> - remove a mapping\n\
    /list - registered channels and mappings\n\
    /addrule <pattern> <replacement> - add a link replacement rule\n\
    /delrule <id> - delete a rule\n\
    /rules - list replacement rules\n\n\
    Post /add_source or /add_dest inside a channel to register it.";

/// Parse a private-chat command line.
///
/// `None` when the text is not a command at all; `Some(Err(usage))`
/// when the command is known but malformed.
pub fn parse_command(text: &str) -> Option<Result<AdminCommand, String>> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    if !command.starts_with('/') {
        return None;
    }
    // Commands may arrive as /map@BotName in group-style chats.
    let name = command.trim_start_matches('/').split('@').next()?;

    let args: Vec<&str> = parts.collect();
    let parsed = match name {
        "start" => Ok(AdminCommand::Start),
        "help" => Ok(AdminCommand::Help),
        "list" => Ok(AdminCommand::List),
        "rules" => Ok(AdminCommand::Rules),
        "map" | "unmap" => match (args.first(), args.get(1)) {
            (Some(a), Some(b)) => match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(source), Ok(dest)) if name == "map" => Ok(AdminCommand::Map { source, dest }),
                (Ok(source), Ok(dest)) => Ok(AdminCommand::Unmap { source, dest }),
                _ => Err(format!("Usage: /{name} <source_id> <dest_id>")),
            },
            _ => Err(format!("Usage: /{name} <source_id> <dest_id>")),
        },
        "addrule" => match (args.first(), args.get(1)) {
            (Some(pattern), Some(_)) => Ok(AdminCommand::AddRule {
                pattern: (*pattern).to_string(),
                replacement: args[1..].join(" "),
            }),
            _ => Err("Usage: /addrule <pattern> <replacement>".into()),
        },
        "delrule" => match args.first().map(|a| a.parse::<i64>()) {
            Some(Ok(id)) => Ok(AdminCommand::DelRule { id }),
            _ => Err("Usage: /delrule <rule_id>".into()),
        },
        _ => return None,
    };
    Some(parsed)
}

/// Parse an in-channel registration command, tolerating an `@BotName`
/// suffix like the private-chat parser does.
fn parse_registration(text: &str) -> Option<ChannelRole> {
    let command = text.trim().split('@').next()?;
    match command {
        "/add_source" => Some(ChannelRole::Source),
        "/add_dest" => Some(ChannelRole::Destination),
        _ => None,
    }
}

pub struct AdminHandler {
    api: Arc<BotApi>,
    store: Arc<dyn Store>,
    config: Arc<SharedConfig>,
    admin_ids: HashSet<i64>,
}

impl AdminHandler {
    pub fn new(
        api: Arc<BotApi>,
        store: Arc<dyn Store>,
        config: Arc<SharedConfig>,
        admin_ids: HashSet<i64>,
    ) -> Self {
        Self {
            api,
            store,
            config,
            admin_ids,
        }
    }

    /// Handle a private-chat message. Non-commands are ignored.
    pub async fn handle_private(&self, message: &Message) {
        let Some(text) = &message.text else { return };
        let Some(parsed) = parse_command(text) else {
            return;
        };

        let command = match parsed {
            Ok(command) => command,
            Err(usage) => {
                self.reply(message.chat.id, &usage).await;
                return;
            }
        };

        // /start and /help are open; everything else is admin-only.
        let open = matches!(command, AdminCommand::Start | AdminCommand::Help);
        let sender = message.from.as_ref().map(|u| u.id);
        if !open && !sender.is_some_and(|id| self.admin_ids.contains(&id)) {
            self.reply(message.chat.id, "Admins only.").await;
            return;
        }

        let response = match self.execute(command).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Admin command failed");
                format!("Command failed: {e}")
            }
        };
        self.reply(message.chat.id, &response).await;
    }

    async fn execute(&self, command: AdminCommand) -> Result<String, StorageError> {
        match command {
            AdminCommand::Start | AdminCommand::Help => Ok(HELP_TEXT.to_string()),
            AdminCommand::Map { source, dest } => {
                if source == dest {
                    return Ok("A channel cannot be mapped to itself.".into());
                }
                let added = self.store.add_mapping(source, dest).await?;
                self.refresh_routing().await?;
                Ok(if added {
                    format!("Mapped {source} -> {dest}")
                } else {
                    format!("Mapping {source} -> {dest} already exists")
                })
            }
            AdminCommand::Unmap { source, dest } => {
                let removed = self.store.remove_mapping(source, dest).await?;
                self.refresh_routing().await?;
                Ok(if removed {
                    format!("Unmapped {source} -> {dest}")
                } else {
                    format!("No mapping {source} -> {dest}")
                })
            }
            AdminCommand::List => {
                let channels = self.store.list_channels().await?;
                let mappings = self.store.list_mappings().await?;
                let mut out = String::from("Channels:\n");
                if channels.is_empty() {
                    out.push_str("  (none)\n");
                }
                for c in channels {
                    out.push_str(&format!("  {} [{}] {}\n", c.chat_id, c.role, c.title));
                }
                out.push_str("Mappings:\n");
                if mappings.is_empty() {
                    out.push_str("  (none)");
                }
                for m in mappings {
                    out.push_str(&format!("  {} -> {}\n", m.source, m.dest));
                }
                Ok(out)
            }
            AdminCommand::AddRule { pattern, replacement } => {
                // Reject rules that would only be skipped at apply time.
                let probe = crate::pipeline::rules::ReplacementRule {
                    id: 0,
                    pattern: pattern.clone(),
                    replacement: replacement.clone(),
                    order: 0,
                };
                let compiled = RuleSet::compile(vec![probe], 0);
                if compiled.is_empty() {
                    return Ok(format!("Rule rejected: '{pattern}' does not compile"));
                }
                let id = self.store.add_rule(&pattern, &replacement, None).await?;
                self.refresh_rules().await?;
                Ok(format!("Rule {id} added"))
            }
            AdminCommand::DelRule { id } => {
                let removed = self.store.remove_rule(id).await?;
                self.refresh_rules().await?;
                Ok(if removed {
                    format!("Rule {id} deleted")
                } else {
                    format!("No rule with id {id}")
                })
            }
            AdminCommand::Rules => {
                let rules = self.store.list_rules().await?;
                if rules.is_empty() {
                    return Ok("No replacement rules.".into());
                }
                let mut out = String::from("Replacement rules:\n");
                for r in rules {
                    out.push_str(&format!(
                        "  {} (order {}): {} -> {}\n",
                        r.id, r.order, r.pattern, r.replacement
                    ));
                }
                Ok(out)
            }
        }
    }

    /// Handle a registration command posted inside a channel.
    ///
    /// Returns `true` when the post was consumed as a command and must
    /// not enter the mirroring pipeline.
    pub async fn handle_channel_command(&self, message: &Message) -> bool {
        let Some(text) = &message.text else {
            return false;
        };
        let Some(role) = parse_registration(text) else {
            return false;
        };
        if message.chat.kind != "channel" {
            return false;
        }

        let title = message.chat.title.clone().unwrap_or_default();
        match self
            .store
            .upsert_channel(message.chat.id, &title, role)
            .await
        {
            Ok(()) => info!(chat_id = message.chat.id, role = %role, "Channel registered"),
            Err(e) => warn!(chat_id = message.chat.id, error = %e, "Channel registration failed"),
        }
        true
    }

    /// Reload mappings from the store into the live configuration.
    pub async fn refresh_routing(&self) -> Result<(), StorageError> {
        let edges = self.store.list_mappings().await?;
        self.config.install_routing(RoutingTable::from_edges(edges));
        Ok(())
    }

    /// Reload rules from the store into the live configuration.
    pub async fn refresh_rules(&self) -> Result<(), StorageError> {
        let rules = self.store.list_rules().await?;
        self.config.install_rules(rules);
        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.api.send_message(chat_id, text, &[]).await {
            warn!(chat_id, error = %e, "Failed to send admin reply");
        }
    }
}
