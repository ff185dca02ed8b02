//! v2fhir core
//!
//! Mapping-and-assembly engine that turns HL7 v2 messages into FHIR resources.
//!
//! A message tree ([`message::Structure`], usually read from ER7 text with
//! [`message::Er7Reader`]) is walked in document order. For each structure
//! with a registered [`rules::StructureHandler`], the handler's rules extract
//! field values, convert them to FHIR datatypes and write them to the bound
//! resource. Resources are collected in a [`Bundle`] together with an
//! identity-stable reference graph.
//!
//! Bad data never aborts a conversion: unconvertible values and unreadable
//! branches become [`issues::Issue`]s and the rest of the message is still
//! converted. Only configuration and programming mistakes are returned as
//! [`V2FhirError`].

pub mod bundle;
pub mod config;
pub mod context;
pub mod convert;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod issues;
pub mod message;
pub mod path;
pub mod references;
pub mod resources;
pub mod rules;
pub mod temporal;
pub mod walker;

// Re-export commonly used types
pub use bundle::Bundle;
pub use config::{ConfigLoader, EngineConfig};
pub use context::ParseContext;
pub use convert::{ConvertContext, ConvertFn, ConverterRegistry, FieldValue, RawValue};
pub use dispatch::{ConversionDispatcher, DispatchStats};
pub use engine::MessageConverter;
pub use error::{ConversionError, ErrorKind, PathError, Result, ResultExt, V2FhirError};
pub use issues::{Issue, IssueKind, IssueSink, LogSink, Severity};
pub use message::{Er7Reader, GroupSpec, Leaf, Segment, Structure};
pub use path::{AttributePath, attribute_to_position, position_to_attribute};
pub use references::{HandleId, ReferenceHandle, ReferenceIndex};
pub use resources::{IdStrategy, RecordKey, ResourceRecord, ResourceRegistry};
pub use rules::{
    Apply, HandlerRegistry, HandlerRule, ResourceBinding, RuleContext, SourceAddress,
    StructureHandler,
};
pub use walker::{StructureNode, StructureWalker};

/// Initialize the tracing subscriber for logging
///
/// `RUST_LOG` takes precedence over the configured filter. Calling this more
/// than once leaves the first subscriber in place.
pub fn init_tracing(config: &EngineConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
