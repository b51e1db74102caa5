//! Scripted command runner for unit tests.

use std::sync::Mutex;

use crate::runner::{CommandRunner, ToolCommand};

type Responder = Box<dyn Fn(&ToolCommand) -> String + Send + Sync>;

/// Records every command and answers with a canned response.
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<ToolCommand>>,
    respond: Responder,
}

impl ScriptedRunner {
    pub(crate) fn new(respond: impl Fn(&ToolCommand) -> String + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    /// Every tool "runs" and prints nothing.
    pub(crate) fn silent() -> Self {
        Self::new(|_| String::new())
    }

    pub(crate) fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &ToolCommand) -> String {
        self.calls.lock().unwrap().push(command.clone());
        (self.respond)(command)
    }
}
