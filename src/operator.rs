//! Human input channel that gates each measurement step.

use std::collections::VecDeque;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::error::{CalibError, Result};

#[allow(async_fn_in_trait)]
pub trait Operator {
    /// Show `prompt` and wait for one line of input (without the newline).
    async fn ask(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<String>;

    /// Operator-facing message.
    fn say(&mut self, message: &str) {
        println!("{message}");
    }

    /// Live single-line readout, overwritten in place on a terminal.
    fn status(&mut self, line: &str) {
        print!("\r{line:<80}");
        let _ = std::io::stdout().flush();
    }
}

/// Reads answers from the process stdin.
pub struct ConsoleOperator {
    lines: Lines<BufReader<Stdin>>,
}

impl ConsoleOperator {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for ConsoleOperator {
    async fn ask(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CalibError::Cancelled),
            line = self.lines.next_line() => match line? {
                Some(line) => Ok(line.trim().to_string()),
                // stdin closed: nobody left to drive the rig
                None => Err(CalibError::Cancelled),
            },
        }
    }
}

/// Pre-recorded answers for tests. Running out of answers cancels.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: VecDeque<String>,
    prompts: Vec<String>,
    messages: Vec<String>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Operator for ScriptedOperator {
    async fn ask(&mut self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(CalibError::Cancelled);
        }
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().ok_or(CalibError::Cancelled)
    }

    fn say(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn status(&mut self, _line: &str) {}
}

/// Wait for Enter.
pub async fn pause<O: Operator>(operator: &mut O, prompt: &str, cancel: &CancellationToken) -> Result<()> {
    operator.ask(prompt, cancel).await.map(|_| ())
}

/// Ask for an index in `0..count`, repeating the question on invalid input.
pub async fn select_index<O: Operator>(
    operator: &mut O,
    prompt: &str,
    count: usize,
    cancel: &CancellationToken,
) -> Result<usize> {
    if count == 0 {
        return Err(CalibError::InvalidInput("nothing to select".to_string()));
    }
    loop {
        let answer = operator.ask(prompt, cancel).await?;
        match answer.parse::<usize>() {
            Ok(index) if index < count => return Ok(index),
            _ => operator.say(&format!("Invalid selection '{}', enter 0..{}", answer, count - 1)),
        }
    }
}

/// Ask for a number, repeating the question until one parses.
pub async fn ask_f64<O: Operator>(operator: &mut O, prompt: &str, cancel: &CancellationToken) -> Result<f64> {
    loop {
        let answer = operator.ask(prompt, cancel).await?;
        match answer.parse::<f64>() {
            Ok(value) if value.is_finite() => return Ok(value),
            _ => operator.say(&format!("'{}' is not a number, try again", answer)),
        }
    }
}
