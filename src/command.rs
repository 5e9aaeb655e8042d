use crate::error::CommandError;
use crate::models::websocket::OutboundFrame;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Restart the remote execution context.
    Reset,
    /// Wipe the local timeline.
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Payload(OutboundFrame),
}

static DEFAULT_COMMANDS: Lazy<HashMap<String, Command>> = Lazy::new(|| {
    HashMap::from([
        ("reset".to_string(), Command::Reset),
        ("clear".to_string(), Command::Clear),
    ])
});

/// Reserved words, matched exactly and case-sensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSet {
    commands: HashMap<String, Command>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self { commands: DEFAULT_COMMANDS.clone() }
    }
}

impl CommandSet {
    pub fn new(commands: impl IntoIterator<Item = (String, Command)>) -> Self {
        Self { commands: commands.into_iter().collect() }
    }

    pub fn lookup(&self, text: &str) -> Option<Command> {
        self.commands.get(text).copied()
    }

    /// Classifies user text. Whitespace-only input is rejected; anything
    /// that is not a reserved word becomes a `run_code` payload.
    pub fn classify(
        &self,
        text: &str,
        model: &str,
        credential: &str
    ) -> Result<Input, CommandError> {
        if text.trim().is_empty() {
            return Err(CommandError::Empty);
        }
        if let Some(command) = self.lookup(text) {
            return Ok(Input::Command(command));
        }
        Ok(
            Input::Payload(OutboundFrame::RunCode {
                code: text.to_string(),
                model: model.to_string(),
                credential: credential.to_string(),
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Result<Input, CommandError> {
        CommandSet::default().classify(text, "gpt-4", "key")
    }

    #[test]
    fn reserved_words_are_commands() {
        assert_eq!(classify("reset"), Ok(Input::Command(Command::Reset)));
        assert_eq!(classify("clear"), Ok(Input::Command(Command::Clear)));
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert!(matches!(classify("Clear"), Ok(Input::Payload(_))));
        assert!(matches!(classify("reset now"), Ok(Input::Payload(_))));
    }

    #[test]
    fn blank_input_is_rejected() {
        assert_eq!(classify(""), Err(CommandError::Empty));
        assert_eq!(classify("   "), Err(CommandError::Empty));
        assert_eq!(classify("\n\t"), Err(CommandError::Empty));
    }

    #[test]
    fn payload_carries_model_and_credential() {
        assert_eq!(
            classify("plot a sine wave"),
            Ok(
                Input::Payload(OutboundFrame::RunCode {
                    code: "plot a sine wave".to_string(),
                    model: "gpt-4".to_string(),
                    credential: "key".to_string(),
                })
            )
        );
    }

    #[test]
    fn custom_command_sets_replace_the_defaults() {
        let commands = CommandSet::new([("wipe".to_string(), Command::Clear)]);
        assert_eq!(commands.lookup("wipe"), Some(Command::Clear));
        assert_eq!(commands.lookup("clear"), None);
    }
}
