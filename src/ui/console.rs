//! Line-oriented console front end
//!
//! Slash commands drive the node, anything else is sent as chat.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config;
use crate::events::Event;
use crate::network::registry::{PeerId, PeerRecord};
use crate::node::Node;
use crate::protocol::ChatMessage;
use crate::session::Role;

/// What the user selected with `/connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// 1-based positions in the last `/peers` listing, or literal peer ids
    Items(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    Connect(Selection),
    Start,
    Stop,
    Disconnect,
    Refresh,
    /// Switch role, optionally under a new display name
    Sender(Option<String>),
    Receiver(Option<String>),
    Idle,
    Quit,
    Chat(String),
    Help,
    Unknown(String),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Chat(line.to_string()));
        }

        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let args: Vec<String> = parts.map(str::to_string).collect();

        Some(match verb.to_lowercase().as_str() {
            "/peers" | "/ls" => Command::Peers,
            "/connect" | "/c" => match args.as_slice() {
                [one] if one.eq_ignore_ascii_case("all") => Command::Connect(Selection::All),
                _ => Command::Connect(Selection::Items(args)),
            },
            "/start" => Command::Start,
            "/stop" => Command::Stop,
            "/disconnect" => Command::Disconnect,
            "/refresh" => Command::Refresh,
            "/sender" => Command::Sender(name_arg(&args)),
            "/receiver" => Command::Receiver(name_arg(&args)),
            "/idle" => Command::Idle,
            "/quit" | "/exit" | "/q" => Command::Quit,
            "/help" | "/?" => Command::Help,
            _ => Command::Unknown(verb.to_string()),
        })
    }
}

/// Display names may contain spaces
fn name_arg(args: &[String]) -> Option<String> {
    (!args.is_empty()).then(|| args.join(" "))
}

/// Resolve a `/connect` selection against the listed peers
///
/// Items that are neither a valid position nor a known id are returned in
/// the second vector.
pub fn resolve_selection(selection: &Selection, peers: &[(PeerId, PeerRecord, bool)]) -> (Vec<PeerId>, Vec<String>) {
    match selection {
        Selection::All => (peers.iter().map(|(id, _, _)| id.clone()).collect(), Vec::new()),
        Selection::Items(items) => {
            let mut found = Vec::new();
            let mut unknown = Vec::new();
            for item in items {
                let by_index = item
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| peers.get(i));
                let by_id = peers.iter().find(|(id, _, _)| id.as_str() == item);

                match by_index.or(by_id) {
                    Some((id, _, _)) if !found.contains(id) => found.push(id.clone()),
                    Some(_) => {}
                    None => unknown.push(item.clone()),
                }
            }
            (found, unknown)
        }
    }
}

pub fn format_chat(chat: &ChatMessage) -> String {
    format!("[{}] {}: {}", chat.timestamp, chat.sender_name, chat.text)
}

pub fn format_event(event: &Event) -> String {
    match event {
        Event::PeerDiscovered { name, address, .. } => format!("* {} ({}) is available", name, address),
        Event::PeerRemoved { peer_id } => format!("* {} removed", peer_id),
        Event::ChatReceived(chat) => format_chat(chat),
        Event::SenderAvailabilityChanged { active: true, name } => format!("* Sender: {}", name),
        Event::SenderAvailabilityChanged { active: false, .. } => "* Searching for sender...".to_string(),
        Event::Acknowledged { from } => format!("* Connected to {}", from),
    }
}

/// Numbered listing for `/peers`
pub fn format_peers(peers: &[(PeerId, PeerRecord, bool)]) -> String {
    if peers.is_empty() {
        return "No peers yet".to_string();
    }

    let mut out = String::new();
    for (i, (id, record, connected)) in peers.iter().enumerate() {
        let mark = if *connected { " [connected]" } else { "" };
        let _ = writeln!(out, "{:>3}. {} ({}){}  {}", i + 1, record.display_name, record.address, mark, id);
    }
    out.truncate(out.trim_end().len());
    out
}

/// Whether the input loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Runs parsed commands against a node and renders the outcome as text
pub struct Console<'a> {
    node: &'a Node,
    profile: Option<PathBuf>,
}

impl<'a> Console<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self { node, profile: None }
    }

    /// Save names given to `/sender` and `/receiver` to this profile file
    pub fn with_profile(mut self, path: Option<PathBuf>) -> Self {
        self.profile = path;
        self
    }

    /// Execute one input line, printing results to stdout
    pub fn handle_line(&self, line: &str) -> Flow {
        let Some(command) = Command::parse(line) else {
            return Flow::Continue;
        };
        let (flow, output) = self.execute(command);
        if !output.is_empty() {
            println!("{}", output);
        }
        flow
    }

    pub fn execute(&self, command: Command) -> (Flow, String) {
        let output = match command {
            Command::Quit => return (Flow::Quit, String::new()),
            Command::Help => HELP.to_string(),
            Command::Unknown(verb) => format!("Unknown command {}, try /help", verb),
            Command::Peers => format_peers(&self.node.peers()),
            Command::Chat(text) => match self.node.send_chat(&text) {
                Ok(chat) => format_chat(&chat),
                Err(e) => format!("! {}", e),
            },
            Command::Connect(selection) => self.connect(&selection),
            Command::Start => match self.node.start_capture() {
                Ok(()) => "* Streaming".to_string(),
                Err(e) => format!("! {}", e),
            },
            Command::Stop => {
                if self.node.stop_capture() {
                    "* Stopped".to_string()
                } else {
                    "* Not streaming".to_string()
                }
            }
            Command::Disconnect => format!("* Closed {} connections", self.node.disconnect_all()),
            Command::Sender(name) => self.switch_role(Role::Sender, name),
            Command::Receiver(name) => self.switch_role(Role::Receiver, name),
            Command::Idle => self.switch_role(Role::Idle, None),
            Command::Refresh => self.switch_role(self.node.role(), None),
        };
        (Flow::Continue, output)
    }

    /// Re-enter `role` from scratch. Without a name the current one is kept.
    fn switch_role(&self, role: Role, name: Option<String>) -> String {
        let name = match name {
            Some(name) => {
                self.save_name(&name);
                name
            }
            None => self.node.session().local_name,
        };

        let result = match role {
            Role::Sender => self.node.become_sender(&name),
            Role::Receiver => self.node.become_receiver(&name),
            Role::Idle => {
                self.node.go_idle();
                Ok(())
            }
        };

        match result {
            Ok(()) if role == Role::Idle => "* Idle".to_string(),
            Ok(()) => format!("* Now {} as {}", role, name.trim()),
            Err(e) if self.node.role() == role => format!("* Now {} as {} (! {})", role, name.trim(), e),
            Err(e) => format!("! {}", e),
        }
    }

    fn save_name(&self, name: &str) {
        let Some(path) = &self.profile else {
            return;
        };
        if name.trim().is_empty() {
            return;
        }
        if let Err(e) = config::save_display_name_to(path, name.trim()) {
            tracing::warn!("Could not save display name: {}", e);
        }
    }

    fn connect(&self, selection: &Selection) -> String {
        if self.node.role() != Role::Sender {
            return "! Only a sender can connect to receivers".to_string();
        }

        let (ids, unknown) = resolve_selection(selection, &self.node.peers());
        let mut out = String::new();
        for item in &unknown {
            let _ = writeln!(out, "! No peer {}", item);
        }
        match self.node.connect_to_peers(&ids) {
            Ok(n) => {
                let _ = write!(out, "* {} connected", n);
            }
            Err(e) => {
                let _ = write!(out, "! {}", e);
            }
        }
        out
    }
}

pub const HELP: &str = "\
/peers              list known peers
/connect <n|id|all> connect to receivers (sender)
/start              start streaming (sender)
/stop               stop streaming (sender)
/disconnect         close all connections (sender)
/sender [name]      become the sender
/receiver [name]    become a receiver
/idle               leave the current role
/refresh            restart the current role
/quit               leave
anything else       chat";
