//! Remote command values

use std::borrow::Cow;

/// Placeholder written to logs in place of masked text
pub const MASKED: &str = "**(masked)**";

/// A unit of remote work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Shell command text
    pub command: String,
    /// Human-readable step title
    pub title: Option<String>,
    /// Run through sudo
    pub sudo: bool,
    /// Hide the command text in logs
    pub mask_input: bool,
    /// Hide the command output in logs
    pub mask_output: bool,
}

impl RemoteCommand {
    /// Create a plain command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            title: None,
            sudo: false,
            mask_input: false,
            mask_output: false,
        }
    }

    /// Create a command that runs through sudo
    pub fn sudo(command: impl Into<String>) -> Self {
        Self::new(command).with_sudo()
    }

    /// Set the step title
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Run through sudo
    pub fn with_sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Hide the command text in logs
    pub fn mask_input(mut self) -> Self {
        self.mask_input = true;
        self
    }

    /// Hide the command output in logs
    pub fn mask_output(mut self) -> Self {
        self.mask_output = true;
        self
    }

    /// Hide both command text and output in logs
    pub fn masked(self) -> Self {
        self.mask_input().mask_output()
    }

    /// The exact text sent to the remote shell
    pub fn shell(&self) -> Cow<'_, str> {
        if self.sudo {
            Cow::Owned(format!("sudo {}", self.command))
        } else {
            Cow::Borrowed(&self.command)
        }
    }

    /// The command as it may appear in logs
    pub fn display_input(&self) -> Cow<'_, str> {
        if self.mask_input {
            Cow::Borrowed(MASKED)
        } else {
            self.shell()
        }
    }

    /// Command output as it may appear in logs
    pub fn display_output<'a>(&self, output: &'a str) -> &'a str {
        if self.mask_output {
            MASKED
        } else {
            output
        }
    }
}

impl From<&str> for RemoteCommand {
    fn from(command: &str) -> Self {
        RemoteCommand::new(command)
    }
}

impl From<String> for RemoteCommand {
    fn from(command: String) -> Self {
        RemoteCommand::new(command)
    }
}
