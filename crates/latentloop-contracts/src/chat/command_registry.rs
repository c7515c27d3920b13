#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandAction {
    Start,
    Help,
    Restart,
    Cancel,
    Models,
    SelectModel,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: CommandAction,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "start",
        action: CommandAction::Start,
    },
    CommandSpec {
        command: "help",
        action: CommandAction::Help,
    },
    CommandSpec {
        command: "restart",
        action: CommandAction::Restart,
    },
    CommandSpec {
        command: "cancel",
        action: CommandAction::Cancel,
    },
    CommandSpec {
        command: "models",
        action: CommandAction::Models,
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "model",
    action: CommandAction::SelectModel,
}];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/start",
    "/help",
    "/models",
    "/model <name>",
    "/cancel",
    "/restart",
];

pub(crate) fn find_action(command: &str, specs: &[CommandSpec]) -> Option<CommandAction> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}
