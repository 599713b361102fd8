use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::runner::{CommandRunner, ExitStatus, ProcessCommand, ProcessError, ProcessOutput};

/// Scripted runner for tests: register expectations, then assert on the
/// recorded call history.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    scripted: Arc<Mutex<Vec<Scripted>>>,
    calls: Arc<Mutex<Vec<ProcessCommand>>>,
}

struct Scripted {
    program: String,
    #[allow(clippy::type_complexity)]
    args_filter: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    output: ProcessOutput,
}

impl Scripted {
    fn applies_to(&self, command: &ProcessCommand) -> bool {
        self.program == command.program
            && self
                .args_filter
                .as_ref()
                .map_or(true, |filter| filter(&command.args))
    }
}

/// Builder returned by [`MockCommandRunner::expect`].
pub struct MockCommandConfig {
    runner: MockCommandRunner,
    entry: Scripted,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start scripting a response for invocations of `program`.
    pub fn expect(&self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            entry: Scripted {
                program: program.to_string(),
                args_filter: None,
                output: ProcessOutput {
                    status: ExitStatus::Success,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: Duration::from_millis(1),
                },
            },
        }
    }

    /// Every command run so far, in order.
    pub fn call_history(&self) -> Vec<ProcessCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());
        self.scripted
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.applies_to(&command))
            .map(|entry| Ok(entry.output.clone()))
            .unwrap_or_else(|| {
                Err(ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {} {:?}",
                    command.program, command.args
                )))
            })
    }
}

impl MockCommandConfig {
    /// Only match invocations whose arguments satisfy `filter`.
    pub fn with_args<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.entry.args_filter = Some(Box::new(filter));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.entry.output.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.entry.output.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.entry.output.status = if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        };
        self
    }

    pub fn finish(self) {
        self.runner.scripted.lock().unwrap().push(self.entry);
    }
}
