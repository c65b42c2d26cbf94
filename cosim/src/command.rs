use std::{fmt, str::FromStr};

/// The operations the orchestrator may invoke.
///
/// Parsing never fails: a name that is not known is kept as
/// [`Command::Unknown`] so that it can still be answered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Init,
    Create,
    SetupDone,
    Step,
    GetData,
    Stop,
    GetProgress,
    GetRelatedEntities,
    /// only ever issued by this side
    SetData,
    SetNext,
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Create => "create",
            Self::SetupDone => "setup_done",
            Self::Step => "step",
            Self::GetData => "get_data",
            Self::Stop => "stop",
            Self::GetProgress => "get_progress",
            Self::GetRelatedEntities => "get_related_entities",
            Self::SetData => "set_data",
            Self::SetNext => "set_next",
            Self::Unknown(name) => name,
        }
    }
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "init" => Self::Init,
            "create" => Self::Create,
            "setup_done" => Self::SetupDone,
            "step" => Self::Step,
            "get_data" => Self::GetData,
            "stop" => Self::Stop,
            "get_progress" => Self::GetProgress,
            "get_related_entities" => Self::GetRelatedEntities,
            "set_data" => Self::SetData,
            "set_next" => Self::SetNext,
            other => Self::Unknown(other.to_owned()),
        })
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(command) => command,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands() {
        for name in [
            "init",
            "create",
            "setup_done",
            "step",
            "get_data",
            "stop",
            "get_progress",
            "get_related_entities",
            "set_data",
            "set_next",
        ] {
            let command = Command::from(name);
            assert!(!matches!(command, Command::Unknown(_)), "{name}");
            assert_eq!(command.to_string(), name);
        }
    }

    #[test]
    fn unknown_command() {
        let command = Command::from("teleport");
        assert_eq!(command, Command::Unknown("teleport".to_owned()));
        assert_eq!(command.name(), "teleport");
    }
}
