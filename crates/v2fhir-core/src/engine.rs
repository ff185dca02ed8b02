//! Message conversion entry point
//!
//! [`MessageConverter`] ties the pieces together: it walks the message tree in
//! document order, resolves the handler for every structure, binds the
//! handler's resource, runs the setup hook, the rules and the finish hook,
//! and returns the finished [`Bundle`].
//!
//! The converter itself holds no per-conversion state. Every call builds a
//! fresh [`ParseContext`], so one converter serves any number of conversions
//! one after the other, and clones share the same immutable registry.
//!
//! Handlers report failures through `Result`. A handler that panics is not
//! caught here; the panic unwinds out of the conversion call.

use crate::bundle::Bundle;
use crate::config::EngineConfig;
use crate::context::ParseContext;
use crate::dispatch::{ConversionDispatcher, DispatchStats};
use crate::error::Result;
use crate::issues::{Issue, IssueSink, LogSink};
use crate::message::{Er7Reader, Structure};
use crate::rules::HandlerRegistry;
use crate::walker::{SkippedBranch, StructureWalker};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone)]
pub struct MessageConverter {
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    reader: Er7Reader,
}

impl MessageConverter {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            reader: Er7Reader::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Reader used by [`MessageConverter::convert_er7`]
    pub fn with_reader(mut self, reader: Er7Reader) -> Self {
        self.reader = reader;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Convert a message tree, logging every issue
    pub fn convert(&self, root: &Structure) -> Result<Bundle> {
        self.convert_with(root, &mut LogSink)
    }

    /// Convert a message tree, reporting issues to `sink`
    ///
    /// Data and structural problems never fail the call; they reach the sink
    /// and the affected value or branch is left out. Only fatal handler errors
    /// are returned.
    pub fn convert_with(&self, root: &Structure, sink: &mut dyn IssueSink) -> Result<Bundle> {
        info!("Converting {}", root.name());
        let mut ctx = ParseContext::new(&self.registry, &self.config, sink);
        let stats = self.run(root, &mut ctx).inspect_err(|err| {
            error!(
                "Conversion of {} aborted ({:?}, recoverable: {}): {}",
                root.name(),
                err.kind(),
                err.is_recoverable(),
                err
            )
        })?;

        info!(
            "Converted {}: {} resource(s), {}, {} issue(s)",
            root.name(),
            ctx.bundle().len(),
            stats,
            ctx.reported()
        );
        Ok(ctx.into_bundle())
    }

    fn run(&self, root: &Structure, ctx: &mut ParseContext<'_, '_>) -> Result<DispatchStats> {
        let dispatcher = ConversionDispatcher::new(self.config.validate_calendar);
        let mut stats = DispatchStats::default();

        let walker = StructureWalker::all(root);
        let mut walk = walker.iter();
        while let Some(node) = walk.next() {
            report_skipped(ctx, walk.take_skipped());

            let Some(handler) = ctx.resolve(node.name()) else {
                trace!("No handler for {}", node.location());
                continue;
            };
            debug!("Handling {}", node.location());

            let resource = ctx.bind(&handler.binding, node.structure().as_segment());
            if let Some(hook) = handler.setup {
                dispatcher.run_hook(hook, "setup", &node, resource, ctx)?;
            }
            let node_stats = dispatcher.dispatch(&node, &handler.rules, resource, ctx)?;
            stats.merge(&node_stats);
            if let Some(hook) = handler.finish {
                dispatcher.run_hook(hook, "finish", &node, resource, ctx)?;
            }
        }
        report_skipped(ctx, walk.take_skipped());
        Ok(stats)
    }

    /// Read ER7 text and convert it, logging every issue
    pub fn convert_er7(&self, text: &str) -> Result<Bundle> {
        self.convert_er7_with(text, &mut LogSink)
    }

    /// Read ER7 text and convert it, reporting issues to `sink`
    pub fn convert_er7_with(&self, text: &str, sink: &mut dyn IssueSink) -> Result<Bundle> {
        let root = self.reader.read(text);
        self.convert_with(&root, sink)
    }
}

fn report_skipped(ctx: &mut ParseContext<'_, '_>, skipped: Vec<SkippedBranch>) {
    for branch in skipped {
        ctx.report(Issue::structural(
            branch.location,
            format!("Skipped unresolved structure: {}", branch.reason),
        ));
    }
}
