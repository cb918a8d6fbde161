//! # Interactive Kernel
//!
//! An orchestration core for interactive code execution. Clients send
//! commands to a [`Kernel`]; the kernel runs them one at a time against a
//! pluggable execution engine and reports what happened as an ordered log of
//! events.
//!
//! ## Building Blocks
//!
//! - Commands and their identities ([`command`])
//! - The event log and the broadcast bus observers subscribe to ([`event`])
//! - Engines: the execution contract and the built-in script engine ([`engine`])
//! - Session state: named bindings ([`value_store`]) and display slots ([`display`])
//! - Rendering values to MIME types ([`formatting`])
//! - Bootstrap code run before the first command ([`profile`])
//!
//! ## Command Flow
//!
//! ```text
//! KernelCommand → Kernel::send → ExecutionEngine
//!                      │              │ EngineOutput (stdout, stderr, display, binding)
//!                      ▼              ▼
//!              KernelCommandResult ← events → EventBus subscribers
//! ```
//!
//! A minimal session:
//!
//! ```no_run
//! # async fn demo() {
//! use interactive_kernel::{Kernel, KernelConfig};
//!
//! let kernel = Kernel::script(KernelConfig::default());
//! let result = kernel.submit_code("$theAnswer = 42; echo $theAnswer").await;
//! assert!(result.succeeded());
//! assert_eq!(result.standard_output(), vec!["42\n"]);
//! # }
//! ```

pub mod command;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod event;
pub mod formatting;
pub mod kernel;
pub mod profile;
pub mod value;
pub mod value_store;

// Re-exports
pub use command::{CommandKind, CommandToken, KernelCommand};
pub use config::{EngineConfig, KernelConfig, ProfileConfig};
pub use engine::{EngineOutput, ExecutionEngine, ScriptEngine};
pub use error::*;
pub use event::*;
pub use formatting::FormattedValue;
pub use kernel::{Kernel, KernelBuilder};
pub use value::Value;
pub use value_store::{BindingOrigin, ValueInfo};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
