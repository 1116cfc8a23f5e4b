//! Scripted command runner for unit tests.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Mutex;

use super::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Fake host: records every command and replays canned output.
///
/// A response applies when its key occurs in the rendered command line; the
/// longest matching key wins.
/// A sequence of responses is consumed in order; the last one then repeats.
/// Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    programs: HashSet<String>,
    responses: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.insert(program.to_string());
        self
    }

    pub fn respond(self, key: &str, output: CommandOutput) -> Self {
        self.respond_seq(key, vec![output])
    }

    pub fn respond_seq(self, key: &str, outputs: Vec<CommandOutput>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push((key.to_string(), outputs.into()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Position of the first call with this prefix.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());

        let mut responses = self.responses.lock().unwrap();
        let matched = responses
            .iter_mut()
            .filter(|(key, _)| line.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len());

        Ok(match matched {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some((_, queue)) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        })
    }

    fn exists(&self, program: &str) -> bool {
        self.programs.contains(program)
    }
}
