//! Human-in-the-loop seam
//!
//! The matcher and the manual fallbacks never touch stdin/stdout directly;
//! they talk to an [`Operator`]. The binary uses [`ConsoleOperator`],
//! headless runs and tests use [`ScriptedOperator`].

use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// Answer given when no further input is available
pub const END_OF_INPUT: &str = "Abort";

/// Source of operator decisions
#[async_trait]
pub trait Operator: Send + Sync {
    /// Show an informational line (candidate listing, status)
    fn show(&self, line: &str);

    /// Prompt for one line of input, returned without the trailing newline
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Operator decision at the selection prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// 1-based index into the ranked candidate list
    Select(usize),
    /// New free-text query
    Retry,
    /// Operator supplies the match directly
    Manual,
    /// Give up on this reference
    Abort,
    /// Search again in another market
    ChangeMarket,
    /// Anything else
    Invalid(String),
}

impl Response {
    /// Parse operator input
    ///
    /// Digits select a candidate. Keywords match either in full or by their
    /// first letter, case-insensitively (`r`, `Retry`, `RETRY`).
    ///
    /// # Examples
    ///
    /// ```
    /// use web2mp3::matching::Response;
    ///
    /// assert_eq!(Response::parse("2"), Response::Select(2));
    /// assert_eq!(Response::parse("m"), Response::Manual);
    /// assert_eq!(Response::parse("change market"), Response::ChangeMarket);
    /// ```
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            return match input.parse() {
                Ok(n) => Response::Select(n),
                Err(_) => Response::Invalid(input.to_string()),
            };
        }
        if input_is("Retry", input) {
            Response::Retry
        } else if input_is("Manual", input) {
            Response::Manual
        } else if input_is("Abort", input) {
            Response::Abort
        } else if input_is("Change market", input) {
            Response::ChangeMarket
        } else {
            Response::Invalid(input.to_string())
        }
    }
}

/// Whether `input` is `control` in full or its first letter, ignoring case
pub fn input_is(control: &str, input: &str) -> bool {
    if input.eq_ignore_ascii_case(control) {
        return true;
    }
    let mut chars = input.chars();
    match (chars.next(), chars.next(), control.chars().next()) {
        (Some(c), None, Some(first)) => c.to_ascii_uppercase() == first.to_ascii_uppercase(),
        _ => false,
    }
}

/// Operator reading from stdin and writing to stdout
pub struct ConsoleOperator {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleOperator {
    /// Attach to the process's stdin
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    fn show(&self, line: &str) {
        println!("{line}");
    }

    /// End of input answers [`END_OF_INPUT`]
    async fn ask(&self, prompt: &str) -> Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.write_all(b" ").await?;
        stdout.flush().await?;

        let mut lines = self.lines.lock().await;
        Ok(match lines.next_line().await? {
            Some(line) => line.trim_end().to_string(),
            None => END_OF_INPUT.to_string(),
        })
    }
}

/// Operator replaying canned answers
///
/// Once the answers run out every prompt receives [`END_OF_INPUT`].
/// Everything shown and asked is recorded for inspection.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    shown: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    /// Operator answering with `answers` in order
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Lines passed to [`Operator::show`]
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Prompts passed to [`Operator::ask`]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Answers not consumed yet
    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    fn show(&self, line: &str) {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(answer.unwrap_or_else(|| END_OF_INPUT.to_string()))
    }
}
