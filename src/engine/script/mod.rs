//! # Script Engine
//!
//! A small shell-style language with pipelines, variables and a handful of
//! built-in commands. It exists so the kernel has a real engine to drive:
//! every output kind the kernel understands can be produced from script code.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `echo`, `Write-Output` | each argument is one output value |
//! | `Write-Host` | arguments joined by spaces on one line |
//! | `Write-Progress` | keyed display update, cleared when the submission ends |
//! | `Start-Sleep` | `-Milliseconds` or `-Seconds` |
//! | `throw` | fails the submission with the given message |
//! | `Get-History`, `Get-Variable`, `Get-Date`, `Get-Verb` | session queries |
//! | `%`, `ForEach-Object` | projects a member of each pipeline value |
//! | `Out-Display`, `Out-Null` | display or drop pipeline values |
//!
//! Anything else runs as a native program unless native commands are
//! disabled.

pub mod completeness;
pub mod interpreter;
pub mod operators;
pub mod parser;
pub mod progress;
pub mod session;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::instrument;

use self::{interpreter::Interpreter, parser::parse_script, session::Session};
use super::{CompletenessChecker, EngineResult, EngineSink, ExecutionEngine};
use crate::{config::EngineConfig, value_store::BindingOrigin};

pub struct ScriptEngine {
    config: EngineConfig,
    session: Mutex<Session>,
}

impl ScriptEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            session: Mutex::new(Session::default()),
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[async_trait]
impl ExecutionEngine for ScriptEngine {
    fn name(&self) -> &str {
        "script"
    }

    #[instrument(level = "debug", skip_all, fields(origin = %origin))]
    async fn execute(
        &self,
        code: &str,
        origin: BindingOrigin,
        sink: EngineSink,
    ) -> EngineResult<()> {
        let mut session = self.session.lock().await;
        let result = match parse_script(code) {
            Ok(statements) => {
                Interpreter::new(&self.config, &mut session, &sink)
                    .run(&statements)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if origin == BindingOrigin::User {
            session.record_submission(code, self.config.history_size);
        }
        result
    }

    async fn reset(&self) {
        *self.session.lock().await = Session::default();
    }
}

impl CompletenessChecker for ScriptEngine {
    fn is_complete(&self, code: &str) -> bool {
        completeness::is_complete(code)
    }
}
