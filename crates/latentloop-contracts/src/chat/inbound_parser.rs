use super::command_registry::{find_action, CommandAction, NO_ARG_COMMANDS, RAW_ARG_COMMANDS};

/// A user message as the session engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Noop,
    Start,
    Help,
    Restart,
    Cancel,
    Models,
    SelectModel(String),
    Unknown { command: String, arg: String },
    Text(String),
}

pub fn parse_inbound(text: &str) -> Inbound {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Inbound::Noop;
    }
    if raw_trimmed.eq_ignore_ascii_case("cancel") {
        return Inbound::Cancel;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return Inbound::Text(raw_trimmed.to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Inbound::Text(raw_trimmed.to_string());
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        if action == CommandAction::SelectModel && !arg.is_empty() {
            return Inbound::SelectModel(arg.to_string());
        }
        return Inbound::Models;
    }

    match find_action(&command, NO_ARG_COMMANDS) {
        Some(CommandAction::Start) => Inbound::Start,
        Some(CommandAction::Help) => Inbound::Help,
        Some(CommandAction::Restart) => Inbound::Restart,
        Some(CommandAction::Cancel) => Inbound::Cancel,
        Some(CommandAction::Models) => Inbound::Models,
        Some(CommandAction::SelectModel) | None => Inbound::Unknown {
            command,
            arg: arg.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_inbound, Inbound};

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_inbound("   \n"), Inbound::Noop);
    }

    #[test]
    fn plain_text_is_passed_through_trimmed() {
        assert_eq!(parse_inbound(" 5 8\n"), Inbound::Text("5 8".to_string()));
        assert_eq!(parse_inbound("/ 5"), Inbound::Text("/ 5".to_string()));
    }

    #[test]
    fn parse_session_commands() {
        assert_eq!(parse_inbound("/start"), Inbound::Start);
        assert_eq!(parse_inbound("/HELP"), Inbound::Help);
        assert_eq!(parse_inbound("/restart"), Inbound::Restart);
        assert_eq!(parse_inbound("/cancel"), Inbound::Cancel);
        assert_eq!(parse_inbound("/models"), Inbound::Models);
        assert_eq!(parse_inbound(" Cancel "), Inbound::Cancel);
    }

    #[test]
    fn parse_model_selection() {
        assert_eq!(
            parse_inbound("/model   dryrun-faces "),
            Inbound::SelectModel("dryrun-faces".to_string())
        );
        assert_eq!(parse_inbound("/model"), Inbound::Models);
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_inbound("/magic foo bar"),
            Inbound::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string(),
            }
        );
    }
}
