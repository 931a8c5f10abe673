//! Operator interaction: the [`Prompt`] port and the numbered list selector built on it.

use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
};

use anyhow::{Result, bail};

/// Request/response channel to the operator.
pub trait Prompt {
    /// Shows a line of text without waiting for an answer.
    fn say(&mut self, message: &str);

    /// Asks a question and returns the answer with surrounding whitespace removed.
    fn ask(&mut self, question: &str) -> Result<String>;
}

/// Prompt on the controlling terminal.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn say(&mut self, message: &str) {
        println!("{message}");
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{question}")?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            bail!("input closed while waiting for an answer to '{}'", question.trim());
        }
        Ok(line.trim().to_owned())
    }
}

/// Prompt answering from a fixed list, for unattended runs and tests.
///
/// Everything shown or asked is recorded in a transcript.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    transcript: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| (*a).to_owned()).collect(),
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Number of answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompt for ScriptedPrompt {
    fn say(&mut self, message: &str) {
        self.transcript.push(message.to_owned());
    }

    fn ask(&mut self, question: &str) -> Result<String> {
        self.transcript.push(question.to_owned());
        match self.answers.pop_front() {
            Some(answer) => Ok(answer.trim().to_owned()),
            None => bail!("no scripted answer left for '{}'", question.trim()),
        }
    }
}

/// One-line representation of a record in a selection list.
// avoid display trait as this is not the string representation for a serializer
pub trait Render {
    fn render(&self) -> String;
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectMode {
    /// Only a valid list index ends the prompt.
    Strict,
    /// `n`/`no` (any case) is accepted as "choose nothing".
    AllowAbort,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Zero-based index into the rendered list.
    Chosen(usize),
    Abort,
}

/// Maps an answer to a zero-based index, if it is a number in `1..=len`.
pub fn parse_index(answer: &str, len: usize) -> Option<usize> {
    match answer.trim().parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Some(n - 1),
        _ => None,
    }
}

fn is_abort(answer: &str) -> bool {
    answer.eq_ignore_ascii_case("n") || answer.eq_ignore_ascii_case("no")
}

/// Shows `items` as a numbered list and asks until a valid entry is picked.
///
/// The index is only valid for `items` as passed in, callers must not keep it across another
/// discovery run.
pub fn select_one<T: Render>(
    prompt: &mut dyn Prompt,
    title: &str,
    items: &[T],
    mode: SelectMode,
) -> Result<Selection> {
    if items.is_empty() {
        bail!("cannot select from an empty list");
    }

    prompt.say(title);
    for (index, item) in items.iter().enumerate() {
        prompt.say(&format!("[{}] {}", index + 1, item.render()));
    }

    let question = match mode {
        SelectMode::Strict => format!("Select a number (1-{}): ", items.len()),
        SelectMode::AllowAbort => format!("Select a number (1-{}) or 'n' to cancel: ", items.len()),
    };

    loop {
        let answer = prompt.ask(&question)?;

        if mode == SelectMode::AllowAbort && is_abort(&answer) {
            return Ok(Selection::Abort);
        }

        match parse_index(&answer, items.len()) {
            Some(index) => return Ok(Selection::Chosen(index)),
            None => prompt.say(&format!(
                "Invalid selection '{answer}', please enter a number between 1 and {}.",
                items.len()
            )),
        }
    }
}

/// Asks until the answer is exactly one of `options` (case-sensitive).
pub fn ask_choice(prompt: &mut dyn Prompt, question: &str, options: &[&str]) -> Result<String> {
    loop {
        let answer = prompt.ask(question)?;
        if options.contains(&answer.as_str()) {
            return Ok(answer);
        }
        prompt.say(&format!(
            "Invalid input '{answer}', expected one of: {}",
            options.join(", ")
        ));
    }
}

/// Asks until `check` accepts the answer, showing its error message otherwise.
pub fn ask_until<T>(
    prompt: &mut dyn Prompt,
    question: &str,
    check: impl Fn(&str) -> Result<T, String>,
) -> Result<T> {
    loop {
        let answer = prompt.ask(question)?;
        match check(&answer) {
            Ok(value) => return Ok(value),
            Err(msg) => prompt.say(&msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<String> {
        vec!["alpha".to_owned(), "beta".to_owned(), "gamma".to_owned()]
    }

    #[test]
    fn renders_numbered_list() {
        let mut prompt = ScriptedPrompt::new(&["2"]);
        let sel = select_one(&mut prompt, "Pick one:", &items(), SelectMode::Strict).unwrap();

        assert_eq!(sel, Selection::Chosen(1));
        assert_eq!(
            &prompt.transcript()[..4],
            &["Pick one:", "[1] alpha", "[2] beta", "[3] gamma"]
        );
    }

    #[test]
    fn out_of_range_reprompts() {
        let mut prompt = ScriptedPrompt::new(&["0", "4", "two", "", "-1", "3"]);
        let sel = select_one(&mut prompt, "Pick one:", &items(), SelectMode::Strict).unwrap();

        assert_eq!(sel, Selection::Chosen(2));
        assert_eq!(prompt.remaining(), 0);
        let complaints = prompt
            .transcript()
            .iter()
            .filter(|l| l.starts_with("Invalid selection"))
            .count();
        assert_eq!(complaints, 5);
    }

    #[test]
    fn strict_mode_has_no_abort() {
        let mut prompt = ScriptedPrompt::new(&["n", "no", "1"]);
        let sel = select_one(&mut prompt, "Pick one:", &items(), SelectMode::Strict).unwrap();
        assert_eq!(sel, Selection::Chosen(0));
    }

    #[test]
    fn abort_tokens() {
        for token in ["n", "no", "N", "No", "NO"] {
            let mut prompt = ScriptedPrompt::new(&["7", token]);
            let sel =
                select_one(&mut prompt, "Pick one:", &items(), SelectMode::AllowAbort).unwrap();
            assert_eq!(sel, Selection::Abort, "token {token}");
        }

        let mut prompt = ScriptedPrompt::new(&["nope", "1"]);
        let sel = select_one(&mut prompt, "Pick one:", &items(), SelectMode::AllowAbort).unwrap();
        assert_eq!(sel, Selection::Chosen(0));
    }

    #[test]
    fn exhausted_input_is_an_error() {
        let mut prompt = ScriptedPrompt::new(&["9"]);
        assert!(select_one(&mut prompt, "Pick one:", &items(), SelectMode::Strict).is_err());
    }

    #[test]
    fn empty_list_is_refused() {
        let mut prompt = ScriptedPrompt::new(&["1"]);
        let empty: Vec<String> = Vec::new();
        assert!(select_one(&mut prompt, "Pick one:", &empty, SelectMode::Strict).is_err());
        assert!(prompt.transcript().is_empty());
    }

    #[test]
    fn index_parsing() {
        assert_eq!(parse_index("1", 1), Some(0));
        assert_eq!(parse_index(" 3 ", 3), Some(2));
        assert_eq!(parse_index("0", 3), None);
        assert_eq!(parse_index("4", 3), None);
        assert_eq!(parse_index("1.0", 3), None);
        assert_eq!(parse_index("+1", 3), Some(0));
    }

    #[test]
    fn choices_are_exact() {
        let mut prompt = ScriptedPrompt::new(&["FC", "fc "]);
        // the scripted prompt trims, like the terminal one
        assert_eq!(
            ask_choice(&mut prompt, "Storage: ", &["fc", "nfs", "iscsi"]).unwrap(),
            "fc"
        );

        let mut prompt = ScriptedPrompt::new(&["Iscsi", "3", "iscsi"]);
        assert_eq!(
            ask_choice(&mut prompt, "Storage: ", &["fc", "nfs", "iscsi"]).unwrap(),
            "iscsi"
        );
    }

    #[test]
    fn ask_until_reports_errors() {
        let mut prompt = ScriptedPrompt::new(&["x", "5"]);
        let value: u32 = ask_until(&mut prompt, "Number: ", |s| {
            s.parse().map_err(|_| format!("'{s}' is not a number"))
        })
        .unwrap();
        assert_eq!(value, 5);
        assert!(prompt.transcript().contains(&"'x' is not a number".to_owned()));
    }
}
