pub mod builtin;
pub mod registry;
pub mod schema_text;
pub mod spec;

pub use builtin::builtin_registry;
pub use registry::{RegistrySnapshot, ToolRegistry, validate_args};
pub use schema_text::{schema_text, summary_line};
pub use spec::{ArgConstraint, ArgKind, ArgSpec, HandlerBinding, RiskLevel, ToolSpec};
