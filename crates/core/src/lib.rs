pub mod catalog;
pub mod config;
pub mod errors;
pub mod memory;
pub mod persona;

pub use catalog::{AgentCatalog, AgentKind, CatalogError, ChainConfig, Greeting};
pub use errors::{
    AgentError, CompletionError, InterfaceError, MissingInputError, RoutingError, TurnError,
};
pub use memory::{Memory, MemoryEntry};
pub use persona::{Persona, PersonaError};
