//! Rule execution for one visited structure
//!
//! [`ConversionDispatcher::dispatch`] runs a handler's compiled rules against a
//! segment in order. For each rule it extracts the raw values at the source
//! address (one per repetition), converts each through the rule's converter
//! and writes the result to the bound resource.
//!
//! Absent or empty values and converters returning nothing skip the rule
//! silently. Any other data-level failure is reported as an issue and the
//! next value or rule runs. Only [`ConversionError::Fatal`] stops the
//! dispatch, surfacing as [`V2FhirError::Handler`].

use crate::context::ParseContext;
use crate::convert::{ConvertContext, RawValue};
use crate::error::{ConversionError, Result, V2FhirError};
use crate::issues::{Issue, Severity};
use crate::message::Segment;
use crate::resources::RecordKey;
use crate::rules::{Apply, CompiledRule, HookFn};
use crate::walker::StructureNode;
use std::fmt;
use tracing::{trace, warn};

/// Counters for one or more dispatches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Values written to a resource
    pub applied: usize,
    /// Rules or values that had nothing to write
    pub skipped: usize,
    /// Values dropped because of a data error
    pub failed: usize,
}

impl DispatchStats {
    pub fn merge(&mut self, other: &DispatchStats) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} skipped, {} failed",
            self.applied, self.skipped, self.failed
        )
    }
}

/// Applies compiled rules to structures
#[derive(Debug, Clone, Copy)]
pub struct ConversionDispatcher {
    validate_calendar: bool,
}

impl Default for ConversionDispatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConversionDispatcher {
    pub fn new(validate_calendar: bool) -> Self {
        Self { validate_calendar }
    }

    /// Run `rules` against `node`, writing to `resource`
    pub fn dispatch(
        &self,
        node: &StructureNode<'_>,
        rules: &[CompiledRule],
        resource: RecordKey,
        ctx: &mut ParseContext<'_, '_>,
    ) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        let location = node.location();

        let Some(segment) = node.structure().as_segment() else {
            if !rules.is_empty() {
                ctx.report(
                    Issue::structural(location, "field rules cannot apply to a group")
                        .with_severity(Severity::Warning),
                );
                stats.skipped += rules.len();
            }
            return Ok(stats);
        };

        for rule in rules {
            let values = rule.source.extract(segment);
            if values.is_empty() {
                trace!("{}: no value at {}", location, rule.label);
                stats.skipped += 1;
                continue;
            }

            for raw in values {
                match self.apply(rule, raw, segment, location, resource, ctx) {
                    Ok(true) => stats.applied += 1,
                    Ok(false) => stats.skipped += 1,
                    Err(err) if err.is_fatal() => {
                        return Err(V2FhirError::Handler {
                            location: location.to_string(),
                            rule: rule.label.clone(),
                            message: err.to_string(),
                        });
                    }
                    Err(err) => {
                        warn!("{} ({}): {}; value '{}' dropped", location, rule.label, err, raw);
                        stats.failed += 1;
                        ctx.report(Issue::data(location, rule.label.as_str(), &err));
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Convert one value and write it; `Ok(false)` when nothing was written
    fn apply(
        &self,
        rule: &CompiledRule,
        raw: RawValue<'_>,
        segment: &Segment,
        location: &str,
        resource: RecordKey,
        ctx: &mut ParseContext<'_, '_>,
    ) -> std::result::Result<bool, ConversionError> {
        let convert_ctx = ConvertContext {
            table: rule.source.table.as_deref(),
            validate_calendar: self.validate_calendar,
        };
        let Some(value) = (rule.converter)(raw, &convert_ctx)? else {
            trace!("{}: {} converted to nothing", location, rule.label);
            return Ok(false);
        };

        let path = rule.path.as_ref();
        let mut rc = ctx.rule_context(resource, Some(segment), location, path);
        match (rule.apply, path) {
            (Apply::Custom(handler), _) => {
                handler(&mut rc, value)?;
                Ok(true)
            }
            (Apply::Set, Some(path)) => {
                path.set(rc.content_mut()?, value.to_json())?;
                Ok(true)
            }
            (Apply::SetIfUnset, Some(path)) => {
                let content = rc.content_mut()?;
                if path.is_set(content) {
                    trace!("{}: {} already set, {} skipped", location, path, rule.label);
                    return Ok(false);
                }
                path.set(content, value.to_json())?;
                Ok(true)
            }
            (Apply::Append, Some(path)) => {
                path.append(rc.content_mut()?, value.to_json())?;
                Ok(true)
            }
            (_, None) => Err(ConversionError::Fatal(format!(
                "rule {} has no target path",
                rule.label
            ))),
        }
    }

    /// Run a setup or finish hook under the same failure policy as rules
    pub fn run_hook(
        &self,
        hook: HookFn,
        name: &str,
        node: &StructureNode<'_>,
        resource: RecordKey,
        ctx: &mut ParseContext<'_, '_>,
    ) -> Result<()> {
        let location = node.location();
        let segment = node.structure().as_segment();
        let result = {
            let mut rc = ctx.rule_context(resource, segment, location, None);
            hook(&mut rc)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(V2FhirError::Handler {
                location: location.to_string(),
                rule: format!("{}:{}", node.name(), name),
                message: err.to_string(),
            }),
            Err(err) => {
                warn!("{} {} hook: {}", location, name, err);
                ctx.report(Issue::data(location, format!("{}:{}", node.name(), name), &err));
                Ok(())
            }
        }
    }
}
