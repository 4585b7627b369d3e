//! Line commands typed into the terminal while the preview window is open.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Free text: generate a shader for this description.
    Prompt(String),
    Fix,
    Stop,
    Run,
    Source,
    Preset(String),
    Presets,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a description to generate a shader, or one of:
  :fix           ask the service to repair the last failed build
  :stop          stop rendering
  :run           run the last source again
  :source        print the last source
  :preset NAME   generate from a named example prompt
  :presets       list example prompts
  :status        show renderer and fix-cycle state
  :help          show this message
  :quit          close the window and exit";

/// Parses one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(rest) = trimmed.strip_prefix(':') else {
        return Ok(Some(ConsoleCommand::Prompt(trimmed.to_string())));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let command = match name.to_ascii_lowercase().as_str() {
        "fix" => ConsoleCommand::Fix,
        "stop" => ConsoleCommand::Stop,
        "run" => ConsoleCommand::Run,
        "source" => ConsoleCommand::Source,
        "presets" => ConsoleCommand::Presets,
        "status" => ConsoleCommand::Status,
        "help" | "h" | "?" => ConsoleCommand::Help,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        "preset" if argument.is_empty() => {
            return Err("usage: :preset NAME (see :presets)".to_string())
        }
        "preset" => ConsoleCommand::Preset(argument.to_string()),
        other => return Err(format!("unknown command ':{other}' (try :help)")),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_is_a_prompt() {
        assert_eq!(
            parse("  swirling galaxy \n").unwrap(),
            Some(ConsoleCommand::Prompt("swirling galaxy".into()))
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   \t").unwrap(), None);
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(":fix").unwrap(), Some(ConsoleCommand::Fix));
        assert_eq!(parse(":STOP").unwrap(), Some(ConsoleCommand::Stop));
        assert_eq!(parse(":q").unwrap(), Some(ConsoleCommand::Quit));
        assert_eq!(
            parse(":preset   ocean ").unwrap(),
            Some(ConsoleCommand::Preset("ocean".into()))
        );
    }

    #[test]
    fn rejects_unknown_commands_and_missing_arguments() {
        assert!(parse(":launch").unwrap_err().contains(":launch"));
        assert!(parse(":preset").is_err());
    }
}
