//! # Kernel
//!
//! The kernel accepts [`KernelCommand`]s, runs them one at a time against an
//! [`ExecutionEngine`], and answers each with the ordered list of events the
//! command produced. Every event is also published on the [`EventBus`] as it
//! is produced.
//!
//! ## Command pipeline
//!
//! ```text
//! send(command)
//!   ├─ first command of the session? run the profile (Profile origin)
//!   ├─ SubmitCode
//!   │    ├─ CodeSubmissionReceived
//!   │    ├─ incomplete → IncompleteCodeSubmissionReceived, CommandSucceeded
//!   │    └─ CompleteCodeSubmissionReceived
//!   │         engine outputs → stdout/stderr/display events, bindings → store
//!   │         CommandSucceeded | CommandFailed
//!   ├─ RequestValueInfos → ValueInfosProduced (user bindings only)
//!   └─ RequestValue → ValueProduced | CommandFailed(NotFound)
//! ```
//!
//! Exactly one terminal event ends each command. A command that does not reach
//! one on its own is failed with [`FailureKind::Internal`] before its result is
//! returned.

use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::{
    command::{CommandKind, KernelCommand},
    config::KernelConfig,
    display::{DisplayKey, DisplayTracker},
    engine::{
        AlwaysComplete, CompletenessChecker, DisplayRequest, EngineError, EngineOutput,
        EngineSink, ExecutionEngine, ScriptEngine,
    },
    event::{
        ErrorEvent, ErrorReceiver, ErrorSeverity, EventBus, EventPayload, EventReceiver,
        FailureKind, KernelCommandResult, KernelEvent,
    },
    formatting::{DefaultRenderer, FormattedValue, ValueRenderer, PLAIN_TEXT},
    profile::Profile,
    value::Value,
    value_store::{BindingOrigin, ValueStore},
    Error, InternalResult,
};

/// Why a command failed, before it becomes a `CommandFailed` event.
#[derive(Debug, Clone, PartialEq)]
struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "Command cancelled")
    }

    fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Self::new(FailureKind::Internal, format!("Engine panicked: {}", reason))
    }
}

impl From<EngineError> for Failure {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::SinkClosed => Failure::new(FailureKind::Internal, error.to_string()),
            other => Failure::new(FailureKind::Execution, other.to_string()),
        }
    }
}

/// Collects the events of one command and publishes each as it is added.
struct Emitter<'a> {
    command: Arc<KernelCommand>,
    bus: &'a EventBus,
    events: Vec<KernelEvent>,
    terminated: bool,
    // keyed displays this command opened and has not completed
    open_displays: HashSet<DisplayKey>,
}

impl<'a> Emitter<'a> {
    fn new(command: Arc<KernelCommand>, bus: &'a EventBus) -> Self {
        Self {
            command,
            bus,
            events: Vec::new(),
            terminated: false,
            open_displays: HashSet::new(),
        }
    }

    fn emit(&mut self, payload: EventPayload) {
        if self.terminated {
            warn!(
                "Dropping {} after the terminal event of {}",
                payload.kind(),
                self.command.token
            );
            return;
        }
        self.terminated = payload.is_terminal();
        let event = KernelEvent::new(&self.command, payload);
        if let Err(e) = self.bus.publish(event.clone()) {
            warn!("Failed to publish {}: {}", event.kind(), e);
        }
        self.events.push(event);
    }

    fn succeed(&mut self) {
        self.emit(EventPayload::CommandSucceeded);
    }

    fn fail(&mut self, failure: Failure) {
        self.emit(EventPayload::CommandFailed {
            kind: failure.kind,
            message: failure.message,
        });
    }

    fn finish(mut self) -> KernelCommandResult {
        if !self.terminated {
            self.fail(Failure::new(
                FailureKind::Internal,
                "Command ended without a terminal event",
            ));
        }
        KernelCommandResult {
            command: self.command,
            events: self.events,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    profile_loaded: bool,
}

pub struct Kernel {
    engine: Arc<dyn ExecutionEngine>,
    completeness: Arc<dyn CompletenessChecker>,
    renderer: Arc<dyn ValueRenderer>,
    config: KernelConfig,
    store: ValueStore,
    tracker: DisplayTracker,
    event_bus: Arc<EventBus>,
    profile: Profile,
    // held for the whole of a command; commands never interleave
    session: Mutex<SessionState>,
    cancel_tx: broadcast::Sender<()>,
}

#[derive(Default)]
pub struct KernelBuilder {
    engine: Option<Arc<dyn ExecutionEngine>>,
    completeness: Option<Arc<dyn CompletenessChecker>>,
    renderer: Option<Arc<dyn ValueRenderer>>,
    config: KernelConfig,
}

impl KernelBuilder {
    pub fn engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Defaults to treating every submission as complete.
    pub fn completeness(mut self, completeness: Arc<dyn CompletenessChecker>) -> Self {
        self.completeness = Some(completeness);
        self
    }

    /// Defaults to [`DefaultRenderer`].
    pub fn renderer(mut self, renderer: Arc<dyn ValueRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> InternalResult<Kernel> {
        let engine = self
            .engine
            .ok_or_else(|| Error::Config("an execution engine is required".to_string()))?;
        Ok(Kernel::assemble(
            engine,
            self.completeness.unwrap_or_else(|| Arc::new(AlwaysComplete)),
            self.renderer.unwrap_or_else(|| Arc::new(DefaultRenderer)),
            self.config,
        ))
    }
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// A kernel backed by the built-in [`ScriptEngine`].
    pub fn script(config: KernelConfig) -> Self {
        let engine = Arc::new(ScriptEngine::new(config.engine.clone()));
        Self::assemble(engine.clone(), engine, Arc::new(DefaultRenderer), config)
    }

    fn assemble(
        engine: Arc<dyn ExecutionEngine>,
        completeness: Arc<dyn CompletenessChecker>,
        renderer: Arc<dyn ValueRenderer>,
        config: KernelConfig,
    ) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            profile: Profile::new(config.profile.clone()),
            engine,
            completeness,
            renderer,
            config,
            store: ValueStore::new(),
            tracker: DisplayTracker::new(),
            session: Mutex::new(SessionState::default()),
            cancel_tx,
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        self.event_bus.subscribe()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs `command` and returns every event it produced, in order. The last
    /// event is always terminal.
    #[instrument(skip(self, command), fields(token = %command.token, kind = %command.kind))]
    pub async fn send(&self, command: KernelCommand) -> KernelCommandResult {
        let command = Arc::new(command);
        let mut session = self.session.lock().await;
        // one receiver for the whole command, so a cancel that lands while
        // the profile runs still reaches the command
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut cancelled = false;
        if !session.profile_loaded {
            cancelled = self.run_profile(&mut cancel_rx).await;
            session.profile_loaded = true;
        }

        let mut emitter = Emitter::new(command.clone(), &self.event_bus);
        match &command.kind {
            CommandKind::SubmitCode { code } if cancelled => {
                emitter.emit(EventPayload::CodeSubmissionReceived { code: code.clone() });
                emitter.fail(Failure::cancelled());
            }
            _ if cancelled => emitter.fail(Failure::cancelled()),
            CommandKind::SubmitCode { code } => {
                self.submit_code_inner(code, &mut cancel_rx, &mut emitter).await
            }
            CommandKind::RequestValueInfos => {
                emitter.emit(EventPayload::ValueInfosProduced {
                    value_infos: self.store.list_user_defined(),
                });
                emitter.succeed();
            }
            CommandKind::RequestValue { name, mime_type } => {
                self.request_value_inner(name, mime_type.as_deref(), &mut emitter)
            }
        }
        let result = emitter.finish();
        debug!("{} finished with {} events", command.token, result.events.len());
        result
    }

    pub async fn submit_code(&self, code: impl Into<String>) -> KernelCommandResult {
        self.send(KernelCommand::submit_code(code)).await
    }

    pub async fn request_value_infos(&self) -> KernelCommandResult {
        self.send(KernelCommand::request_value_infos()).await
    }

    pub async fn request_value(&self, name: impl Into<String>) -> KernelCommandResult {
        self.send(KernelCommand::request_value(name)).await
    }

    /// Reads a binding without going through the command pipeline.
    /// Profile bindings are visible here.
    pub fn try_get_value(&self, name: &str) -> Option<Value> {
        self.store.try_get(name).ok()
    }

    /// Cancels the command currently running, if any. Returns whether a
    /// command was listening.
    pub fn cancel(&self) -> bool {
        self.cancel_tx.send(()).is_ok()
    }

    /// Forgets all bindings, displays and engine state. The profile runs again
    /// before the next command.
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        self.store.clear();
        self.tracker.clear();
        self.engine.reset().await;
        session.profile_loaded = false;
        info!("Kernel session reset");
    }

    async fn submit_code_inner(
        &self,
        code: &str,
        cancel_rx: &mut broadcast::Receiver<()>,
        emitter: &mut Emitter<'_>,
    ) {
        emitter.emit(EventPayload::CodeSubmissionReceived {
            code: code.to_string(),
        });
        if !self.completeness.is_complete(code) {
            emitter.emit(EventPayload::IncompleteCodeSubmissionReceived {
                code: code.to_string(),
            });
            emitter.succeed();
            return;
        }
        emitter.emit(EventPayload::CompleteCodeSubmissionReceived {
            code: code.to_string(),
        });

        match self
            .execute(code, BindingOrigin::User, cancel_rx, Some(&mut *emitter))
            .await
        {
            Ok(()) => emitter.succeed(),
            Err(failure) => {
                // an interrupted command never sends the completing update
                for key in emitter.open_displays.drain() {
                    self.tracker.retire(&key);
                }
                emitter.fail(failure)
            }
        }
    }

    fn request_value_inner(&self, name: &str, mime_type: Option<&str>, emitter: &mut Emitter<'_>) {
        let value = match self.store.try_get(name) {
            Ok(value) => value,
            Err(e) => return emitter.fail(Failure::new(FailureKind::NotFound, e.to_string())),
        };
        let mime_type = mime_type.unwrap_or(PLAIN_TEXT);
        match self
            .renderer
            .render(&value)
            .into_iter()
            .find(|formatted| formatted.mime_type == mime_type)
        {
            Some(formatted_value) => {
                emitter.emit(EventPayload::ValueProduced {
                    name: name.to_string(),
                    value,
                    formatted_value,
                });
                emitter.succeed();
            }
            None => emitter.fail(Failure::new(
                FailureKind::NotFound,
                format!("No formatter for '{}' produces {}", name, mime_type),
            )),
        }
    }

    /// Returns whether a cancel arrived while the profile ran. The remaining
    /// profile scripts are skipped in that case.
    async fn run_profile(&self, cancel_rx: &mut broadcast::Receiver<()>) -> bool {
        if !self.profile.is_enabled() {
            return false;
        }
        let scripts = match self.profile.load().await {
            Ok(scripts) => scripts,
            Err(e) => {
                warn!("Failed to load profile: {}", e);
                self.report_profile_error("profile", e.to_string());
                return false;
            }
        };
        for script in scripts {
            info!("Running profile script {}", script.source);
            match self
                .execute(&script.code, BindingOrigin::Profile, cancel_rx, None)
                .await
            {
                Ok(()) => {}
                Err(failure) if failure == Failure::cancelled() => {
                    info!("Profile script {} cancelled", script.source);
                    return true;
                }
                Err(failure) => {
                    warn!("Profile script {} failed: {}", script.source, failure.message);
                    self.report_profile_error(&script.source, failure.message);
                }
            }
        }
        false
    }

    fn report_profile_error(&self, source: &str, message: String) {
        let error = ErrorEvent {
            error_type: "ProfileFailed".to_string(),
            message,
            severity: ErrorSeverity::Warning,
            parameters: HashMap::from([("source".to_string(), source.to_string())]),
        };
        if let Err(e) = self.event_bus.publish_error(error) {
            warn!("Failed to publish profile error: {}", e);
        }
    }

    /// Runs code on the engine, forwarding its outputs as they arrive. Without
    /// an emitter (profile code) only bindings are kept. A panicking engine
    /// fails the command like any other engine fault.
    async fn execute(
        &self,
        code: &str,
        origin: BindingOrigin,
        cancel_rx: &mut broadcast::Receiver<()>,
        mut emitter: Option<&mut Emitter<'_>>,
    ) -> Result<(), Failure> {
        let (sink, mut outputs) = EngineSink::channel();
        let execution = AssertUnwindSafe(self.engine.execute(code, origin, sink)).catch_unwind();
        tokio::pin!(execution);

        let command_timeout = self.config.command_timeout;
        let timeout = async move {
            match command_timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.recv() => {
                    info!("Command cancelled");
                    return Err(Failure::cancelled());
                }
                _ = &mut timeout => {
                    let duration = command_timeout.unwrap_or_default();
                    warn!("Command timed out after {:?}", duration);
                    return Err(Failure::new(
                        FailureKind::Cancelled,
                        format!("Command timed out after {} ms", duration.as_millis()),
                    ));
                }
                Some(output) = outputs.recv() => {
                    self.forward(output, origin, emitter.as_deref_mut());
                }
                result = &mut execution => {
                    // outputs sent just before the engine returned
                    while let Ok(output) = outputs.try_recv() {
                        self.forward(output, origin, emitter.as_deref_mut());
                    }
                    return match result {
                        Ok(result) => result.map_err(Failure::from),
                        Err(payload) => {
                            warn!("Engine {} panicked", self.engine.name());
                            Err(Failure::panicked(payload))
                        }
                    };
                }
            }
        }
    }

    fn forward(&self, output: EngineOutput, origin: BindingOrigin, emitter: Option<&mut Emitter<'_>>) {
        match (output, emitter) {
            (EngineOutput::Binding { name, value }, _) => self.store.set(&name, value, origin),
            (output, None) => debug!("Profile output: {:?}", output),
            (EngineOutput::StandardOutput(text), Some(emitter)) => {
                emitter.emit(EventPayload::StandardOutputValueProduced {
                    formatted_values: vec![FormattedValue::plain(text)],
                })
            }
            (EngineOutput::StandardError(text), Some(emitter)) => {
                emitter.emit(EventPayload::StandardErrorValueProduced {
                    formatted_values: vec![FormattedValue::plain(text)],
                })
            }
            (EngineOutput::Display(request), Some(emitter)) => {
                if let Some(key) = &request.key {
                    if request.completes {
                        emitter.open_displays.remove(key);
                    } else {
                        emitter.open_displays.insert(key.clone());
                    }
                }
                emitter.emit(self.display(request))
            }
        }
    }

    /// Resolves the slot a display request goes to. A request without a key
    /// always gets a new slot.
    fn display(&self, request: DisplayRequest) -> EventPayload {
        let formatted_values = self.renderer.render(&request.value);
        let (slot, is_new) = match &request.key {
            Some(key) => self.tracker.track(key),
            None => (self.tracker.mint(), true),
        };
        if let (true, Some(key)) = (request.completes, &request.key) {
            self.tracker.retire(key);
        }
        if is_new {
            EventPayload::DisplayedValueProduced {
                slot,
                value: request.value,
                formatted_values,
            }
        } else {
            EventPayload::DisplayedValueUpdated {
                slot,
                value: request.value,
                formatted_values,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::ProfileConfig,
        display::{DisplayKey, SlotId},
        engine::{EngineResult, MockCompletenessChecker},
        event::EventKind,
        formatting::MockValueRenderer,
    };

    /// Binds every submitted code string to itself, then sends the scripted
    /// outputs. Fails when the code is `fail`, hangs when it is `hang` and
    /// panics when it is `panic`.
    #[derive(Default)]
    struct ScriptedEngine {
        outputs: Vec<EngineOutput>,
        calls: StdMutex<Vec<(String, BindingOrigin)>>,
    }

    impl ScriptedEngine {
        fn with_outputs(outputs: Vec<EngineOutput>) -> Self {
            Self {
                outputs,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, BindingOrigin)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            code: &str,
            origin: BindingOrigin,
            sink: EngineSink,
        ) -> EngineResult<()> {
            self.calls.lock().unwrap().push((code.to_string(), origin));
            sink.binding(code, Value::from(code))?;
            for output in &self.outputs {
                sink.send(output.clone())?;
            }
            match code {
                "fail" => Err(EngineError::runtime("boom")),
                "panic" => panic!("engine exploded"),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    fn kernel_with(engine: Arc<ScriptedEngine>, config: KernelConfig) -> Kernel {
        Kernel::builder().engine(engine).config(config).build().unwrap()
    }

    #[tokio::test]
    async fn test_submit_code_event_order() {
        let engine = Arc::new(ScriptedEngine::with_outputs(vec![
            EngineOutput::StandardOutput("hello\n".to_string()),
            EngineOutput::StandardError("warn\n".to_string()),
        ]));
        let kernel = kernel_with(engine, KernelConfig::default());

        let result = kernel.submit_code("greet").await;
        assert_eq!(
            result.kinds(),
            vec![
                EventKind::CodeSubmissionReceived,
                EventKind::CompleteCodeSubmissionReceived,
                EventKind::StandardOutputValueProduced,
                EventKind::StandardErrorValueProduced,
                EventKind::CommandSucceeded,
            ]
        );
        assert_eq!(result.standard_output(), vec!["hello\n"]);
        assert!(result
            .events
            .iter()
            .all(|event| event.command.token == result.command.token));
    }

    #[tokio::test]
    async fn test_incomplete_submission_is_not_executed() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut completeness = MockCompletenessChecker::new();
        completeness
            .expect_is_complete()
            .times(1)
            .returning(|code| !code.ends_with('('));
        let kernel = Kernel::builder()
            .engine(engine.clone())
            .completeness(Arc::new(completeness))
            .build()
            .unwrap();

        let result = kernel.submit_code("if (").await;
        assert_eq!(
            result.kinds(),
            vec![
                EventKind::CodeSubmissionReceived,
                EventKind::IncompleteCodeSubmissionReceived,
                EventKind::CommandSucceeded,
            ]
        );
        assert!(result.is_incomplete());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_outputs_before_failure_are_kept() {
        let engine = Arc::new(ScriptedEngine::with_outputs(vec![EngineOutput::StandardOutput(
            "partial\n".to_string(),
        )]));
        let kernel = kernel_with(engine, KernelConfig::default());

        let result = kernel.submit_code("fail").await;
        assert_eq!(
            result.kinds(),
            vec![
                EventKind::CodeSubmissionReceived,
                EventKind::CompleteCodeSubmissionReceived,
                EventKind::StandardOutputValueProduced,
                EventKind::CommandFailed,
            ]
        );
        assert_eq!(result.failure(), Some((FailureKind::Execution, "boom")));
        // bindings made before the failure persist
        assert_eq!(kernel.try_get_value("fail"), Some(Value::from("fail")));
    }

    #[tokio::test]
    async fn test_keyed_displays_share_a_slot_until_completed() {
        let key = DisplayKey::new("progress-1");
        let engine = Arc::new(ScriptedEngine::with_outputs(vec![
            EngineOutput::Display(DisplayRequest::keyed(key.clone(), Value::from("0%"))),
            EngineOutput::Display(DisplayRequest::keyed(key.clone(), Value::from("50%"))),
            EngineOutput::Display(DisplayRequest::completing(key.clone(), Value::from(""))),
            EngineOutput::Display(DisplayRequest::keyed(key.clone(), Value::from("again"))),
            EngineOutput::Display(DisplayRequest::new(Value::from("unkeyed"))),
        ]));
        let kernel = kernel_with(engine, KernelConfig::default());

        let result = kernel.submit_code("show").await;
        let slots: Vec<(EventKind, SlotId)> = result
            .events
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::DisplayedValueProduced { slot, .. }
                | EventPayload::DisplayedValueUpdated { slot, .. } => Some((event.kind(), *slot)),
                _ => None,
            })
            .collect();
        assert_eq!(slots.len(), 5);
        assert_eq!(slots[0].0, EventKind::DisplayedValueProduced);
        assert_eq!(slots[1], (EventKind::DisplayedValueUpdated, slots[0].1));
        assert_eq!(slots[2], (EventKind::DisplayedValueUpdated, slots[0].1));
        assert_eq!(slots[3].0, EventKind::DisplayedValueProduced);
        assert_ne!(slots[3].1, slots[0].1);
        assert_eq!(slots[4].0, EventKind::DisplayedValueProduced);
        assert_ne!(slots[4].1, slots[3].1);
    }

    #[tokio::test]
    async fn test_request_value_by_mime_type() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut renderer = MockValueRenderer::new();
        renderer
            .expect_render()
            .returning(|value| vec![FormattedValue::new("application/json", format!("\"{}\"", value))]);
        let kernel = Kernel::builder()
            .engine(engine)
            .renderer(Arc::new(renderer))
            .build()
            .unwrap();
        kernel.submit_code("x").await;

        let result = kernel
            .send(KernelCommand::request_value_as("x", "application/json"))
            .await;
        assert_eq!(
            result.kinds(),
            vec![EventKind::ValueProduced, EventKind::CommandSucceeded]
        );
        assert!(matches!(
            &result.events[0].payload,
            EventPayload::ValueProduced { formatted_value, .. } if formatted_value.value == "\"x\""
        ));

        let result = kernel.request_value("x").await;
        assert_eq!(result.failure().map(|(kind, _)| kind), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_request_missing_value() {
        let kernel = kernel_with(Arc::new(ScriptedEngine::default()), KernelConfig::default());
        let result = kernel.request_value("nothing").await;
        assert_eq!(result.kinds(), vec![EventKind::CommandFailed]);
        assert_eq!(result.failure().map(|(kind, _)| kind), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_profile_runs_once_and_is_hidden() {
        let engine = Arc::new(ScriptedEngine::default());
        let config = KernelConfig {
            profile: ProfileConfig {
                enabled: true,
                scripts: vec!["bootstrap".to_string()],
                paths: vec![],
            },
            ..Default::default()
        };
        let kernel = kernel_with(engine.clone(), config);

        let (mut events, _errors) = kernel.subscribe();
        let result = kernel.submit_code("mine").await;
        kernel.submit_code("again").await;

        assert_eq!(result.events[0].kind(), EventKind::CodeSubmissionReceived);
        assert_eq!(
            engine.calls(),
            vec![
                ("bootstrap".to_string(), BindingOrigin::Profile),
                ("mine".to_string(), BindingOrigin::User),
                ("again".to_string(), BindingOrigin::User),
            ]
        );
        assert_eq!(kernel.try_get_value("bootstrap"), Some(Value::from("bootstrap")));

        let infos = kernel.request_value_infos().await;
        let names: Vec<&str> = infos
            .value_infos()
            .unwrap()
            .iter()
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(names, vec!["mine", "again"]);

        // the profile publishes nothing on the bus
        let first = events.drain().into_iter().next().unwrap();
        assert_eq!(first.kind(), EventKind::CodeSubmissionReceived);
    }

    #[tokio::test]
    async fn test_profile_failure_goes_to_error_channel() {
        let engine = Arc::new(ScriptedEngine::default());
        let config = KernelConfig {
            profile: ProfileConfig {
                enabled: true,
                scripts: vec!["fail".to_string()],
                paths: vec![],
            },
            ..Default::default()
        };
        let kernel = kernel_with(engine, config);
        let (_events, mut errors) = kernel.subscribe();

        let result = kernel.submit_code("ok").await;
        assert!(result.succeeded());

        let error = errors.recv().await.unwrap();
        assert_eq!(error.error_type, "ProfileFailed");
        assert_eq!(error.message, "boom");
        assert_eq!(error.parameters.get("source").map(String::as_str), Some("inline[0]"));
    }

    #[tokio::test]
    async fn test_reset_reruns_profile() {
        let engine = Arc::new(ScriptedEngine::default());
        let config = KernelConfig {
            profile: ProfileConfig {
                enabled: true,
                scripts: vec!["bootstrap".to_string()],
                paths: vec![],
            },
            ..Default::default()
        };
        let kernel = kernel_with(engine.clone(), config);
        kernel.submit_code("mine").await;
        kernel.reset().await;
        assert_eq!(kernel.try_get_value("mine"), None);

        kernel.submit_code("after").await;
        let profile_runs = engine
            .calls()
            .iter()
            .filter(|(_, origin)| *origin == BindingOrigin::Profile)
            .count();
        assert_eq!(profile_runs, 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_as_cancelled() {
        let config = KernelConfig {
            command_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let kernel = kernel_with(Arc::new(ScriptedEngine::default()), config);

        let result = kernel.submit_code("hang").await;
        let (kind, message) = result.failure().unwrap();
        assert_eq!(kind, FailureKind::Cancelled);
        assert_eq!(message, "Command timed out after 50 ms");
    }

    #[tokio::test]
    async fn test_cancel_running_command() {
        let kernel = Arc::new(kernel_with(
            Arc::new(ScriptedEngine::default()),
            KernelConfig::default(),
        ));
        assert!(!kernel.cancel());

        let running = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.submit_code("hang").await })
        };
        let mut cancelled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if kernel.cancel() {
                cancelled = true;
                break;
            }
        }
        assert!(cancelled);

        let result = running.await.unwrap();
        assert_eq!(result.failure().map(|(kind, _)| kind), Some(FailureKind::Cancelled));
        // the kernel accepts commands again
        assert!(kernel.submit_code("next").await.succeeded());
    }

    #[tokio::test]
    async fn test_engine_panic_fails_command() {
        let engine = Arc::new(ScriptedEngine::with_outputs(vec![EngineOutput::StandardOutput(
            "before\n".to_string(),
        )]));
        let kernel = kernel_with(engine, KernelConfig::default());

        let result = kernel.submit_code("panic").await;
        assert_eq!(
            result.kinds(),
            vec![
                EventKind::CodeSubmissionReceived,
                EventKind::CompleteCodeSubmissionReceived,
                EventKind::StandardOutputValueProduced,
                EventKind::CommandFailed,
            ]
        );
        assert_eq!(
            result.failure(),
            Some((FailureKind::Internal, "Engine panicked: engine exploded"))
        );
        assert!(kernel.submit_code("next").await.succeeded());
    }

    #[tokio::test]
    async fn test_cancel_during_profile_fails_the_command() {
        let engine = Arc::new(ScriptedEngine::default());
        let config = KernelConfig {
            profile: ProfileConfig {
                enabled: true,
                scripts: vec!["hang".to_string(), "never".to_string()],
                paths: vec![],
            },
            ..Default::default()
        };
        let kernel = Arc::new(kernel_with(engine.clone(), config));
        let (_events, mut errors) = kernel.subscribe();

        let running = {
            let kernel = kernel.clone();
            tokio::spawn(async move { kernel.submit_code("user code").await })
        };
        let mut cancelled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if kernel.cancel() {
                cancelled = true;
                break;
            }
        }
        assert!(cancelled);

        let result = running.await.unwrap();
        assert_eq!(
            result.kinds(),
            vec![EventKind::CodeSubmissionReceived, EventKind::CommandFailed]
        );
        assert_eq!(
            result.failure(),
            Some((FailureKind::Cancelled, "Command cancelled"))
        );
        assert_eq!(
            engine.calls(),
            vec![("hang".to_string(), BindingOrigin::Profile)]
        );
        // a cancelled profile is not a profile failure
        assert!(errors.try_recv().is_none());

        assert!(kernel.submit_code("again").await.succeeded());
    }

    #[tokio::test]
    async fn test_interrupted_command_releases_its_displays() {
        let key = DisplayKey::new("progress-1");
        let engine = Arc::new(ScriptedEngine::with_outputs(vec![EngineOutput::Display(
            DisplayRequest::keyed(key.clone(), Value::from("50%")),
        )]));
        let config = KernelConfig {
            command_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let kernel = kernel_with(engine, config);

        let interrupted = kernel.submit_code("hang").await;
        assert_eq!(
            interrupted.failure().map(|(kind, _)| kind),
            Some(FailureKind::Cancelled)
        );
        let first_slot = match &interrupted.events[2].payload {
            EventPayload::DisplayedValueProduced { slot, .. } => *slot,
            other => panic!("unexpected payload {:?}", other),
        };

        let result = kernel.submit_code("ok").await;
        match &result.events[2].payload {
            EventPayload::DisplayedValueProduced { slot, .. } => assert_ne!(*slot, first_slot),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_engine() {
        assert!(matches!(Kernel::builder().build(), Err(Error::Config(_))));
    }
}
