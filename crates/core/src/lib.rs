// Core of the Toolgate tool-invocation gateway: schemas, registry,
// cursors, auth/quota guard and the transport-neutral dispatcher

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod registry;
pub mod schema;

pub use config::GatewayConfig;
pub use dispatch::{Dispatcher, InvocationRequest, InvocationResult, ToolFilter};
pub use error::{DispatchError, ErrorBody, ErrorKind};
pub use guard::{AuthIdentity, Guard, GuardError};
pub use registry::{ToolDescriptor, ToolHandler, ToolRegistry};
