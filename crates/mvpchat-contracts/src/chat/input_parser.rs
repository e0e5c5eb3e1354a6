use super::command_registry::{
    find_action, CommandAction, ATTACH_COMMANDS, MODEL_COMMANDS, NO_ARG_COMMANDS, STYLE_COMMAND,
};
use super::route::{Attachment, Turn};
use crate::models::Capability;
use crate::payload::PromptStyle;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Noop,
    Help,
    Reset,
    History,
    Quit,
    Turn(Turn),
    SetPromptStyle(PromptStyle),
    SetModel { capability: Capability, model: String },
    MissingArgument { command: String, usage: &'static str },
    Unknown { command: String, arg: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Splits `<path> [text...]`. The path may be quoted; the text is kept as
/// typed so apostrophes in a question survive.
fn parse_attach_args(arg: &str) -> Option<(String, String)> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return None;
    }
    let quote = trimmed.chars().next().filter(|ch| *ch == '"' || *ch == '\'');
    if let Some(quote) = quote {
        let tail = &trimmed[1..];
        if let Some(end) = tail.find(quote) {
            let path = tail[..end].to_string();
            let text = tail[end + 1..].trim().to_string();
            return Some((path, text));
        }
        let parts = split_args(trimmed);
        let path = parts.first()?.clone();
        return Some((path, parts[1..].join(" ")));
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((path, text)) => Some((path.to_string(), text.trim().to_string())),
        None => Some((trimmed.to_string(), String::new())),
    }
}

pub fn parse_input(text: &str) -> ChatInput {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatInput::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return match action {
                    CommandAction::Help => ChatInput::Help,
                    CommandAction::Reset => ChatInput::Reset,
                    CommandAction::History => ChatInput::History,
                    CommandAction::Quit => ChatInput::Quit,
                };
            }

            if ATTACH_COMMANDS.iter().any(|value| *value == command) {
                let Some((path, text)) = parse_attach_args(arg) else {
                    return ChatInput::MissingArgument {
                        command,
                        usage: "/image <path> [text]",
                    };
                };
                return ChatInput::Turn(
                    Turn::text(text).with_attachment(Attachment::from_path(path)),
                );
            }

            if command == STYLE_COMMAND {
                return match PromptStyle::parse(arg) {
                    Some(style) => ChatInput::SetPromptStyle(style),
                    None => ChatInput::MissingArgument {
                        command,
                        usage: "/style <preamble|raw>",
                    },
                };
            }

            if let Some(capability) = find_action(&command, MODEL_COMMANDS) {
                if arg.is_empty() {
                    return ChatInput::MissingArgument {
                        command,
                        usage: "/<capability>_model <owner/name[:version]>",
                    };
                }
                return ChatInput::SetModel {
                    capability,
                    model: arg.to_string(),
                };
            }

            return ChatInput::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    ChatInput::Turn(Turn::text(raw_trimmed))
}
