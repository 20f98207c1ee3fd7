//! Transformers: rule applications binding input artifacts to outputs.

pub mod command;
mod types;

pub use command::{BuiltinCommand, Command, CommandSignature, ProcessCommand, command_signature};
pub use types::{RuleId, Transformer, TransformerId};
