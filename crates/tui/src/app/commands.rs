use blue_core::ModelId;
use tracing::info;

use super::App;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersonaCommand {
    Pick,
    Clear,
    Select(String),
    Create { name: String, prompt: String },
    Delete(String),
}

/// A parsed `/command` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Model(Option<String>),
    Persona(PersonaCommand),
    New,
    Image(String),
    Images,
    Default(String),
    Stats,
    Stop,
    Help,
    Unknown(String),
    /// Recognized command missing its argument; holds the usage line.
    Usage(&'static str),
}

impl Command {
    /// `None` when `text` is not a slash command. A leading `//` escapes the slash.
    pub fn parse(text: &str) -> Option<Command> {
        let s = text.trim();
        let rest = s.strip_prefix('/')?;
        if rest.starts_with('/') {
            return None;
        }
        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().unwrap_or("").trim();
        let cmd = match cmd.as_str() {
            "model" => Command::Model((!arg.is_empty()).then(|| arg.to_string())),
            "persona" => Command::Persona(parse_persona(arg)),
            "new" => Command::New,
            "image" if arg.is_empty() => Command::Usage("/image <prompt>"),
            "image" => Command::Image(arg.to_string()),
            "images" => Command::Images,
            "default" if arg.is_empty() => Command::Usage("/default <model>"),
            "default" => Command::Default(arg.to_string()),
            "stats" => Command::Stats,
            "stop" => Command::Stop,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        };
        Some(cmd)
    }
}

/// Message text with a `//` escape reduced to a single `/`.
pub fn literal_message(text: &str) -> &str {
    if text.starts_with("//") {
        &text[1..]
    } else {
        text
    }
}

fn parse_persona(arg: &str) -> PersonaCommand {
    if arg.is_empty() {
        return PersonaCommand::Pick;
    }
    if arg.eq_ignore_ascii_case("none") {
        return PersonaCommand::Clear;
    }
    let mut parts = arg.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("").to_lowercase();
    let tail = parts.next().unwrap_or("").trim();
    match head.as_str() {
        "new" if !tail.is_empty() => match tail.split_once(':') {
            Some((name, prompt)) if !name.trim().is_empty() && !prompt.trim().is_empty() => {
                PersonaCommand::Create {
                    name: name.trim().to_string(),
                    prompt: prompt.trim().to_string(),
                }
            }
            _ => PersonaCommand::Create {
                name: tail.to_string(),
                prompt: String::new(),
            },
        },
        "delete" if !tail.is_empty() => PersonaCommand::Delete(tail.to_string()),
        _ => PersonaCommand::Select(arg.to_string()),
    }
}

impl App {
    pub(crate) fn run_command(&mut self, cmd: Command) {
        info!(target: "tui", "command: {:?}", cmd);
        match cmd {
            Command::Model(None) => self.open_model_picker(),
            Command::Model(Some(id)) => match ModelId::parse(&id) {
                Some(m) => self.set_model(m),
                None => self.notice(format!("[info] unknown model '{}'", id)),
            },
            Command::Persona(p) => self.run_persona_command(p),
            Command::New => self.new_chat(),
            Command::Image(prompt) => self.start_image(prompt),
            Command::Images => self.show_images(),
            Command::Default(id) => match ModelId::parse(&id) {
                Some(m) => self.set_default_model(m),
                None => self.notice(format!("[info] unknown model '{}'", id)),
            },
            Command::Stats => self.show_stats(),
            Command::Stop => {
                if !self.stop_stream() {
                    self.notice("[info] nothing to stop");
                }
            }
            Command::Help => self.show_help = true,
            Command::Unknown(name) => self.notice(format!("[info] unknown command '/{}'", name)),
            Command::Usage(usage) => self.notice(format!("[info] usage: {}", usage)),
        }
    }

    fn run_persona_command(&mut self, cmd: PersonaCommand) {
        match cmd {
            PersonaCommand::Pick => self.open_persona_picker(),
            PersonaCommand::Clear => self.select_persona(None),
            PersonaCommand::Select(name) => match self.find_persona(&name) {
                Some(id) => self.select_persona(Some(id)),
                None => self.notice(format!("[info] no persona named '{}'", name)),
            },
            PersonaCommand::Create { prompt, .. } if prompt.is_empty() => {
                self.notice("[info] usage: /persona new <name>: <system prompt>")
            }
            PersonaCommand::Create { name, prompt } => self.create_persona(&name, &prompt),
            PersonaCommand::Delete(name) => match self.find_persona(&name) {
                Some(id) => self.delete_persona(id),
                None => self.notice(format!("[info] no persona named '{}'", name)),
            },
        }
    }
}
