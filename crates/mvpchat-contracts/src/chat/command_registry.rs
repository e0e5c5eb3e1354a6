use crate::models::Capability;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    Help,
    Reset,
    History,
    Quit,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec<A: 'static> {
    pub command: &'static str,
    pub action: A,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec<CommandAction>] = &[
    CommandSpec {
        command: "help",
        action: CommandAction::Help,
    },
    CommandSpec {
        command: "reset",
        action: CommandAction::Reset,
    },
    CommandSpec {
        command: "clear",
        action: CommandAction::Reset,
    },
    CommandSpec {
        command: "history",
        action: CommandAction::History,
    },
    CommandSpec {
        command: "quit",
        action: CommandAction::Quit,
    },
    CommandSpec {
        command: "exit",
        action: CommandAction::Quit,
    },
];

pub(crate) const MODEL_COMMANDS: &[CommandSpec<Capability>] = &[
    CommandSpec {
        command: "text_model",
        action: Capability::Text,
    },
    CommandSpec {
        command: "vision_model",
        action: Capability::Vision,
    },
    CommandSpec {
        command: "image_model",
        action: Capability::Image,
    },
];

pub(crate) const ATTACH_COMMANDS: &[&str] = &["image", "attach"];

pub(crate) const STYLE_COMMAND: &str = "style";

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/image <path> [text]",
    "/reset",
    "/history",
    "/style <preamble|raw>",
    "/text_model <owner/name[:version]>",
    "/vision_model <owner/name[:version]>",
    "/image_model <owner/name[:version]>",
    "/quit",
];

pub(crate) fn find_action<A: Copy>(command: &str, specs: &[CommandSpec<A>]) -> Option<A> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

#[cfg(test)]
mod tests {
    use super::{find_action, CommandAction, CHAT_HELP_COMMANDS, MODEL_COMMANDS, NO_ARG_COMMANDS};
    use crate::models::Capability;

    #[test]
    fn aliases_share_an_action() {
        assert_eq!(
            find_action("clear", NO_ARG_COMMANDS),
            find_action("reset", NO_ARG_COMMANDS)
        );
        assert_eq!(find_action("exit", NO_ARG_COMMANDS), Some(CommandAction::Quit));
    }

    #[test]
    fn model_commands_map_to_capabilities() {
        assert_eq!(
            find_action("vision_model", MODEL_COMMANDS),
            Some(Capability::Vision)
        );
        assert_eq!(find_action("model", MODEL_COMMANDS), None);
    }

    #[test]
    fn help_lists_every_model_command() {
        for spec in MODEL_COMMANDS {
            let prefix = format!("/{} ", spec.command);
            assert!(CHAT_HELP_COMMANDS
                .iter()
                .any(|line| line.starts_with(&prefix)));
        }
    }
}
