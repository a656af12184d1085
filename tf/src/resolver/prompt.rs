//! Interactive input for bracket placeholders

use std::collections::VecDeque;
use std::sync::Mutex;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use super::ResolveError;

/// Source of interactively typed values
pub trait Prompter: Send + Sync {
    /// Show `message` and block until the user answers
    fn prompt(&self, message: &str) -> Result<String, ResolveError>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default)]
pub struct ReadlinePrompter;

impl Prompter for ReadlinePrompter {
    fn prompt(&self, message: &str) -> Result<String, ResolveError> {
        debug!(%message, "ReadlinePrompter::prompt: called");
        let mut rl = DefaultEditor::new().map_err(|e| ResolveError::Prompt(format!("Failed to initialize readline: {}", e)))?;
        match rl.readline(message) {
            Ok(line) => Ok(line),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                debug!("ReadlinePrompter::prompt: input aborted");
                Err(ResolveError::Prompt("input aborted".to_string()))
            }
            Err(e) => Err(ResolveError::Prompt(format!("Readline error: {}", e))),
        }
    }
}

/// Answers prompts from a fixed list, recording every question asked
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Messages shown so far, in order
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&self, message: &str) -> Result<String, ResolveError> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(message.to_string());
        }
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| ResolveError::Prompt("answer list poisoned".to_string()))?;
        answers
            .pop_front()
            .ok_or_else(|| ResolveError::Prompt(format!("no scripted answer for '{}'", message)))
    }
}
