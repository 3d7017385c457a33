//! Standard action library
//!
//! Built-in handlers for common flow steps.

mod debug;
mod file;
mod http;
mod time;
mod transform;

pub use debug::{EchoAction, LogAction};
pub use file::FileLoadAction;
pub use http::HttpRequestAction;
pub use time::DelayAction;
pub use transform::{JsonParseAction, JsonStringifyAction};

use evalcore::RegistryError;
use evalruntime::ActionRegistryBuilder;
use std::sync::Arc;

/// Register all standard actions with a registry
pub fn register_all(registry: &mut ActionRegistryBuilder) -> Result<(), RegistryError> {
    registry
        .register(debug::echo_definition(), Arc::new(EchoAction))?
        .register(debug::log_definition(), Arc::new(LogAction))?
        .register(transform::parse_definition(), Arc::new(JsonParseAction))?
        .register(transform::stringify_definition(), Arc::new(JsonStringifyAction))?
        .register(time::definition(), Arc::new(DelayAction))?
        .register(http::definition(), Arc::new(HttpRequestAction::new()))?
        .register(file::definition(), Arc::new(FileLoadAction))?;
    Ok(())
}
