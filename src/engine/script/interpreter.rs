use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use async_recursion::async_recursion;
use chrono::Utc;
use tracing::{debug, trace};

use super::{
    operators,
    parser::{Argument, Expr, Pipeline, Stage, Statement, StringPart},
    progress::{ProgressRecord, ProgressTracker},
    session::Session,
};
use crate::{
    config::EngineConfig,
    engine::{
        native::{run_native, NativeOutput},
        DisplayRequest, EngineError, EngineResult, EngineSink,
    },
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Destination {
    /// Written to standard output.
    Output,
    /// Collected for an assignment.
    Capture,
    /// `> $null`
    Discard,
}

/// Arguments of one command invocation, bound by parameter name.
#[derive(Debug, Default)]
struct BoundArguments {
    command: String,
    named: HashMap<String, Value>,
    switches: HashSet<String>,
    positional: Vec<Value>,
}

impl BoundArguments {
    fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    fn switch(&self, name: &str) -> bool {
        self.switches.contains(name)
    }

    fn int(&self, name: &str) -> EngineResult<Option<i64>> {
        self.get(name)
            .map(|value| {
                value
                    .as_i64()
                    .ok_or_else(|| self.invalid(name, format!("Cannot convert '{}' to an integer.", value)))
            })
            .transpose()
    }

    fn float(&self, name: &str) -> EngineResult<Option<f64>> {
        self.get(name)
            .map(|value| {
                value
                    .as_f64()
                    .ok_or_else(|| self.invalid(name, format!("Cannot convert '{}' to a number.", value)))
            })
            .transpose()
    }

    fn invalid(&self, parameter: &str, message: impl Into<String>) -> EngineError {
        EngineError::InvalidArgument {
            command: self.command.clone(),
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluates parsed statements against a session for one submission.
pub struct Interpreter<'a> {
    config: &'a EngineConfig,
    session: &'a mut Session,
    sink: &'a EngineSink,
    progress: ProgressTracker,
}

impl<'a> Interpreter<'a> {
    pub fn new(config: &'a EngineConfig, session: &'a mut Session, sink: &'a EngineSink) -> Self {
        Self {
            config,
            session,
            sink,
            progress: ProgressTracker::new(config.progress_bar_width),
        }
    }

    /// Runs a whole submission. Progress displays still open at the end are
    /// cleared whether or not the submission failed.
    pub async fn run(&mut self, statements: &[Statement]) -> EngineResult<()> {
        let result = self.block(statements).await;
        let cleared = self.progress.clear(self.sink);
        result.and(cleared)
    }

    async fn block(&mut self, statements: &[Statement]) -> EngineResult<()> {
        for statement in statements {
            self.statement(statement).await?;
        }
        Ok(())
    }

    #[async_recursion]
    async fn statement(&mut self, statement: &Statement) -> EngineResult<()> {
        match statement {
            Statement::Assignment { name, pipeline } => {
                let values = self.pipeline(pipeline, Destination::Capture).await?;
                self.assign(name, collapse(values))
            }
            Statement::Pipeline(pipeline) => {
                let destination = if pipeline.discard_output {
                    Destination::Discard
                } else {
                    Destination::Output
                };
                let values = self.pipeline(pipeline, destination).await?;
                if destination == Destination::Output {
                    for value in values {
                        self.write_output(value)?;
                    }
                }
                Ok(())
            }
            Statement::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.block(body).await;
                    }
                }
                match otherwise {
                    Some(body) => self.block(body).await,
                    None => Ok(()),
                }
            }
            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.statement(init).await?;
                }
                loop {
                    if let Some(condition) = condition {
                        if !self.eval(condition)?.is_truthy() {
                            break;
                        }
                    }
                    self.block(body).await?;
                    if let Some(step) = step {
                        self.statement(step).await?;
                    }
                    // lets cancellation in the caller's select! get through
                    tokio::task::yield_now().await;
                }
                Ok(())
            }
            Statement::Foreach {
                variable,
                collection,
                body,
            } => {
                for item in enumerate(self.eval(collection)?) {
                    self.assign(variable, item)?;
                    self.block(body).await?;
                    tokio::task::yield_now().await;
                }
                Ok(())
            }
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> EngineResult<()> {
        trace!("{} = {:?}", name, value);
        self.session.set_variable(name, value.clone());
        self.sink.binding(name, value)
    }

    async fn pipeline(
        &mut self,
        pipeline: &Pipeline,
        destination: Destination,
    ) -> EngineResult<Vec<Value>> {
        let last = pipeline.stages.len().saturating_sub(1);
        let mut values: Vec<Value> = Vec::new();
        for (index, stage) in pipeline.stages.iter().enumerate() {
            let input = values.into_iter().flat_map(enumerate).collect();
            let streaming = index == last && destination == Destination::Output;
            values = self.stage(stage, index == 0, input, streaming).await?;
        }
        Ok(values)
    }

    async fn stage(
        &mut self,
        stage: &Stage,
        first: bool,
        input: Vec<Value>,
        streaming: bool,
    ) -> EngineResult<Vec<Value>> {
        match stage {
            Stage::Expression(expr) if first => Ok(vec![self.eval(expr)?]),
            Stage::Expression(_) => Err(EngineError::runtime(
                "Expressions are only allowed as the first element of a pipeline.",
            )),
            Stage::Native { program, args } => {
                let program = self.eval(program)?.to_string();
                self.native(&program, args, streaming).await
            }
            Stage::Command { name, args } => self.command(name, args, input, streaming).await,
        }
    }

    async fn command(
        &mut self,
        name: &str,
        args: &[Argument],
        input: Vec<Value>,
        streaming: bool,
    ) -> EngineResult<Vec<Value>> {
        match name.to_ascii_lowercase().as_str() {
            "echo" | "write-output" => Ok(self.bind(name, args, &[])?.positional),
            "write-host" => self.write_host(name, args),
            "write-progress" => self.write_progress(name, args),
            "start-sleep" => self.start_sleep(name, args).await,
            "throw" => self.throw(name, args, input),
            "get-history" => self.get_history(name, args),
            "get-variable" => self.get_variable(name, args),
            "get-date" => Ok(vec![Value::String(Utc::now().to_rfc3339())]),
            "get-verb" => Ok(verbs()),
            "%" | "foreach-object" => self.foreach_object(name, args, input),
            "out-display" => self.out_display(name, args, input),
            "out-null" => Ok(Vec::new()),
            _ => self.native(name, args, streaming).await,
        }
    }

    fn bind(&self, command: &str, args: &[Argument], switches: &[&str]) -> EngineResult<BoundArguments> {
        let mut bound = BoundArguments {
            command: command.to_string(),
            ..Default::default()
        };
        let mut args = args.iter().peekable();
        while let Some(arg) = args.next() {
            match arg {
                Argument::Parameter(parameter) => {
                    let key = parameter.to_ascii_lowercase();
                    if switches.contains(&key.as_str()) {
                        bound.switches.insert(key);
                        continue;
                    }
                    match args.next_if(|next| matches!(next, Argument::Value(_))) {
                        Some(Argument::Value(expr)) => {
                            let value = self.eval(expr)?;
                            bound.named.insert(key, value);
                        }
                        _ => {
                            bound.switches.insert(key);
                        }
                    }
                }
                Argument::Value(expr) => bound.positional.push(self.eval(expr)?),
            }
        }
        Ok(bound)
    }

    fn write_host(&mut self, name: &str, args: &[Argument]) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &["nonewline"])?;
        let mut text = bound
            .positional
            .iter()
            .map(interpolate)
            .collect::<Vec<_>>()
            .join(" ");
        if !bound.switch("nonewline") {
            text.push('\n');
        }
        self.sink.stdout(text)?;
        Ok(Vec::new())
    }

    fn write_progress(&mut self, name: &str, args: &[Argument]) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &["completed"])?;
        let completed = bound.switch("completed");
        let activity = bound
            .get("activity")
            .or_else(|| bound.positional.first())
            .map(ToString::to_string);
        let activity = match (activity, completed) {
            (Some(activity), _) => activity,
            (None, true) => String::new(),
            (None, false) => return Err(bound.invalid("Activity", "A value is required.")),
        };
        let status = bound
            .get("status")
            .or_else(|| bound.positional.get(1))
            .map(ToString::to_string)
            .unwrap_or_else(|| "Processing".to_string());
        let record = ProgressRecord {
            id: bound.int("id")?.unwrap_or(0),
            activity,
            status,
            percent_complete: bound.int("percentcomplete")?.filter(|p| *p >= 0),
            completed,
        };
        self.progress.write(&record, self.sink)?;
        Ok(Vec::new())
    }

    async fn start_sleep(&mut self, name: &str, args: &[Argument]) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &[])?;
        let duration = match bound.int("milliseconds")? {
            Some(millis) => Duration::from_millis(millis.max(0) as u64),
            None => {
                let seconds = match bound.float("seconds")? {
                    Some(seconds) => seconds,
                    None => bound
                        .positional
                        .first()
                        .and_then(Value::as_f64)
                        .ok_or_else(|| bound.invalid("Seconds", "A duration is required."))?,
                };
                Duration::from_secs_f64(seconds.max(0.0))
            }
        };
        trace!("Sleeping for {:?}", duration);
        tokio::time::sleep(duration).await;
        Ok(Vec::new())
    }

    fn throw(&self, name: &str, args: &[Argument], input: Vec<Value>) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &[])?;
        let message = bound
            .positional
            .into_iter()
            .chain(input)
            .next()
            .map(|value| value.to_string())
            .unwrap_or_else(|| "ScriptHalted".to_string());
        Err(EngineError::Runtime { message })
    }

    fn get_history(&self, name: &str, args: &[Argument]) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &[])?;
        let entries: Vec<Value> = self.session.history().map(|e| e.to_value()).collect();
        let count = bound
            .int("count")?
            .map_or(entries.len(), |count| count.max(0) as usize);
        let skip = entries.len().saturating_sub(count);
        Ok(entries.into_iter().skip(skip).collect())
    }

    fn get_variable(&self, name: &str, args: &[Argument]) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &["valueonly"])?;
        let value_only = bound.switch("valueonly");
        let entry = |name: &str, value: &Value| {
            if value_only {
                value.clone()
            } else {
                Value::Map(BTreeMap::from([
                    ("Name".to_string(), Value::String(name.to_string())),
                    ("Value".to_string(), value.clone()),
                ]))
            }
        };

        let requested: Vec<String> = bound
            .get("name")
            .into_iter()
            .chain(bound.positional.iter())
            .map(ToString::to_string)
            .collect();
        if requested.is_empty() {
            return Ok(self
                .session
                .variables()
                .into_iter()
                .map(|(name, value)| entry(name.as_str(), value))
                .collect());
        }
        requested
            .iter()
            .map(|name| {
                self.session
                    .try_variable(name)
                    .map(|value| entry(name.as_str(), value))
                    .ok_or_else(|| {
                        EngineError::runtime(format!(
                            "Cannot find a variable with the name '{}'.",
                            name
                        ))
                    })
            })
            .collect()
    }

    fn foreach_object(&self, name: &str, args: &[Argument], input: Vec<Value>) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &[])?;
        let member = bound
            .get("membername")
            .or_else(|| bound.positional.first())
            .map(ToString::to_string)
            .ok_or_else(|| bound.invalid("MemberName", "A member name is required."))?;
        Ok(input
            .iter()
            .map(|value| value.member(&member).cloned().unwrap_or_default())
            .collect())
    }

    fn out_display(&self, name: &str, args: &[Argument], input: Vec<Value>) -> EngineResult<Vec<Value>> {
        let bound = self.bind(name, args, &[])?;
        for value in input.into_iter().chain(bound.positional) {
            self.sink.display(DisplayRequest::new(value))?;
        }
        Ok(Vec::new())
    }

    async fn native(
        &mut self,
        program: &str,
        args: &[Argument],
        streaming: bool,
    ) -> EngineResult<Vec<Value>> {
        if !self.config.allow_native_commands {
            return Err(EngineError::CommandNotFound {
                name: program.to_string(),
            });
        }
        let args = args
            .iter()
            .map(|arg| match arg {
                Argument::Parameter(parameter) => Ok(format!("-{}", parameter)),
                Argument::Value(expr) => self.eval(expr).map(|value| interpolate(&value)),
            })
            .collect::<EngineResult<Vec<_>>>()?;
        debug!("Running native command {} {:?}", program, args);

        let mode = if streaming {
            NativeOutput::Stream
        } else {
            NativeOutput::Capture
        };
        let lines = run_native(program, &args, self.sink, mode).await?;
        Ok(lines.into_iter().map(Value::String).collect())
    }

    fn write_output(&self, value: Value) -> EngineResult<()> {
        match value {
            Value::Null => Ok(()),
            Value::List(items) => items
                .into_iter()
                .try_for_each(|item| self.write_output(item)),
            other => self.sink.stdout(format!("{}\n", other)),
        }
    }

    fn eval(&self, expr: &Expr) -> EngineResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Bareword(word) => Ok(Value::String(word.clone())),
            Expr::Variable(name) => Ok(self.session.variable(name)),
            Expr::LastToken => Ok(self.session.last_token()),
            Expr::FirstToken => Ok(self.session.first_token()),
            Expr::Interpolated(parts) => Ok(Value::String(
                parts
                    .iter()
                    .map(|part| match part {
                        StringPart::Literal(text) => text.clone(),
                        StringPart::Variable(name) => interpolate(&self.session.variable(name)),
                    })
                    .collect(),
            )),
            Expr::Binary { op, lhs, rhs } => operators::apply(*op, self.eval(lhs)?, self.eval(rhs)?),
            Expr::Map(entries) => entries
                .iter()
                .map(|(key, expr)| Ok((key.clone(), self.eval(expr)?)))
                .collect::<EngineResult<BTreeMap<_, _>>>()
                .map(Value::Map),
            Expr::List(items) => items
                .iter()
                .map(|expr| self.eval(expr))
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::List),
        }
    }
}

/// Lists flow through pipelines item by item; null contributes nothing.
fn enumerate(value: Value) -> Vec<Value> {
    match value {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::List(values),
    }
}

/// Text of a value inside a string: list items are joined by spaces.
fn interpolate(value: &Value) -> String {
    match value {
        Value::List(items) => items.iter().map(interpolate).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn verbs() -> Vec<Value> {
    [
        ("Add", "Common"),
        ("Clear", "Common"),
        ("Get", "Common"),
        ("Set", "Common"),
        ("Start", "Lifecycle"),
        ("Stop", "Lifecycle"),
        ("Out", "Data"),
        ("Write", "Communications"),
    ]
    .into_iter()
    .map(|(verb, group)| {
        Value::Map(BTreeMap::from([
            ("Verb".to_string(), Value::from(verb)),
            ("Group".to_string(), Value::from(group)),
        ]))
    })
    .collect()
}
