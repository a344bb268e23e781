mod directive;
mod errors;
mod instructions;
mod models;
mod parser;
mod runner;

pub use directive::AgentDirective;
pub use errors::AgentError;
pub use models::{
    AgentOptions, AgentOutcome, REASON_ABANDONED, REASON_CANCELLED, REASON_TURN_LIMIT,
};
pub use parser::{DirectiveError, parse_directive};
pub use runner::Agent;
