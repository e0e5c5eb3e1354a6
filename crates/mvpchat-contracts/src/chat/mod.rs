mod command_registry;
mod input_parser;
mod route;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use input_parser::{parse_input, ChatInput};
pub use route::{classify_route, Attachment, Route, Turn, IMAGE_GENERATION_TRIGGER};
