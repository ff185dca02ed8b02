//! Handler rules
//!
//! Mapping content is declared per structure type as a [`StructureHandler`]:
//! a resource binding, an ordered list of [`HandlerRule`]s and optional setup
//! and finish hooks. Handlers are registered once and compiled into an
//! immutable [`HandlerRegistry`].

mod registry;
mod rule;

pub use registry::{
    CompiledHandler, CompiledRule, HandlerRegistry, HandlerRegistryBuilder, HookFn,
    ResourceBinding, StructureHandler,
};
pub use rule::{Apply, HandlerFn, HandlerRule, RuleContext, SourceAddress};
