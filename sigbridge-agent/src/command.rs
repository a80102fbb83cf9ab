//! Command classification for inbound text

/// What an inbound message asks the bridge to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A chat turn with the given text
    Chat(String),
    /// Forget the sender's conversation history
    Clear,
    /// List the models the completion service offers
    ListModels,
    /// Show the command overview
    Help,
    /// `!`-prefixed text that matches no known command; original text kept
    Unknown(String),
}

/// One row of the command table shown by `!help`
#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub token: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

pub const CHAT: CommandInfo = CommandInfo {
    token: "!chat",
    usage: "!chat <message>",
    description: "Chat with AI assistant",
};

pub const CLEAR: CommandInfo = CommandInfo {
    token: "!clear",
    usage: "!clear",
    description: "Clear conversation history",
};

pub const MODELS: CommandInfo = CommandInfo {
    token: "!models",
    usage: "!models",
    description: "List available models",
};

pub const HELP: CommandInfo = CommandInfo {
    token: "!help",
    usage: "!help",
    description: "Show this help message",
};

/// Every recognized command, in help order
pub const COMMANDS: [CommandInfo; 4] = [CHAT, CLEAR, MODELS, HELP];

impl Command {
    /// One-line description of the command
    pub fn describe(&self) -> &'static str {
        match self {
            Command::Chat(_) => CHAT.description,
            Command::Clear => CLEAR.description,
            Command::ListModels => MODELS.description,
            Command::Help => HELP.description,
            Command::Unknown(_) => "Unrecognized command, answered as chat",
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Chat(_) => "chat",
            Command::Clear => "clear",
            Command::ListModels => "models",
            Command::Help => "help",
            Command::Unknown(_) => "unknown",
        }
    }
}

/// Classify raw message text. Never fails.
///
/// The first whitespace-delimited token must equal a command token exactly,
/// so `!clearall` is not `!clear`. Text without a `!` prefix is a chat turn.
pub fn classify(raw: &str) -> Command {
    let text = raw.trim();
    let (token, rest) = match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], &text[idx..]),
        None => (text, ""),
    };

    match token {
        t if t == CHAT.token => Command::Chat(rest.trim_start().to_string()),
        t if t == CLEAR.token => Command::Clear,
        t if t == MODELS.token => Command::ListModels,
        t if t == HELP.token => Command::Help,
        t if t.starts_with('!') => Command::Unknown(raw.to_string()),
        _ => Command::Chat(text.to_string()),
    }
}

/// The `!help` reply: the command table followed by `footer`
pub fn help_text(footer: &str) -> String {
    let mut text = String::from("Available commands:\n");
    for info in COMMANDS {
        text.push_str(&format!("{} - {}\n", info.usage, info.description));
    }
    if !footer.is_empty() {
        text.push('\n');
        text.push_str(footer);
    }
    text.trim_end().to_string()
}
