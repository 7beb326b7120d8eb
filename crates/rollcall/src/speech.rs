//! Text-to-speech announcements via an external synthesizer command.

use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("failed to run speech command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("speech command '{command}' exited with {status}")]
    Failed { command: String, status: String },
}

/// Speaks confirmation messages. The engine never treats a speech failure
/// as fatal; attendance is already recorded by the time anything is said.
pub trait Announcer {
    fn announce(&self, text: &str) -> Result<(), SpeechError>;
}

/// Shells out to an espeak-ng-style synthesizer:
/// `<command> -v <voice> -s <rate> <text>`.
pub struct CommandAnnouncer {
    command: String,
    voice: String,
    rate: u32,
}

impl CommandAnnouncer {
    pub fn new(command: &str, voice: &str, rate: u32) -> Self {
        Self {
            command: command.to_string(),
            voice: voice.to_string(),
            rate,
        }
    }
}

impl Announcer for CommandAnnouncer {
    fn announce(&self, text: &str) -> Result<(), SpeechError> {
        let status = Command::new(&self.command)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.rate.to_string())
            .arg(text)
            .status()
            .map_err(|source| SpeechError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SpeechError::Failed {
                command: self.command.clone(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

/// Silent announcer for tests and speech-disabled configurations.
pub struct NullAnnouncer;

impl Announcer for NullAnnouncer {
    fn announce(&self, _text: &str) -> Result<(), SpeechError> {
        Ok(())
    }
}

/// The confirmation phrase spoken when a student is first marked.
pub fn confirmation_phrase(name: &str) -> String {
    format!("{name}, your attendance has been taken.")
}
