//! Datatype conversion from raw HL7 values to typed field values
//!
//! Every rule names a converter. A converter takes the raw value extracted
//! from the segment (a single component's text, or a whole field repetition
//! for composite types) and produces a [`FieldValue`], `Ok(None)` when the
//! value carries nothing worth mapping, or a [`ConversionError`] for data that
//! cannot be interpreted.
//!
//! The built-in converters are registered under their FHIR type names
//! (`dateTime`, `CodeableConcept`, ...) and under the matching HL7 v2 type
//! codes (`DTM`, `CWE`, ...).

use crate::error::ConversionError;
use crate::message::Repetition;
use crate::temporal::{self, Precision};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value, json};
use std::fmt;

/// Raw value handed to a converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    /// A single component or subcomponent
    Text(&'a str),
    /// A whole field repetition
    Composite(&'a Repetition),
}

impl<'a> RawValue<'a> {
    /// Component by 1-based index; plain text only has component 1
    pub fn component(&self, index: usize) -> Option<&'a str> {
        match self {
            RawValue::Text(text) => (index == 1 && !text.is_empty()).then_some(*text),
            RawValue::Composite(rep) => rep.component(index).value(),
        }
    }

    /// Subcomponent of a component, both 1-based
    pub fn subcomponent(&self, component: usize, sub: usize) -> Option<&'a str> {
        match self {
            RawValue::Text(_) if sub == 1 => self.component(component),
            RawValue::Text(_) => None,
            RawValue::Composite(rep) => rep
                .component_at(component)
                .and_then(|c| c.subcomponent(sub).value()),
        }
    }

    /// Text of the value; component 1 for composites
    pub fn text(&self) -> Option<&'a str> {
        self.component(1).map(str::trim).filter(|t| !t.is_empty())
    }
}

impl fmt::Display for RawValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Text(text) => f.write_str(text),
            RawValue::Composite(rep) => {
                let parts: Vec<&str> = rep
                    .components
                    .iter()
                    .map(|c| c.subcomponents.first().map_or("", String::as_str))
                    .collect();
                f.write_str(&parts.join("^"))
            }
        }
    }
}

/// Typed result of a conversion
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Decimal(Number),
    Boolean(bool),
    Code(String),
    Date(String),
    DateTime(String),
    Time(String),
    Instant(String),
    /// Complex datatypes rendered as their FHIR JSON shape
    Complex(Value),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s)
            | FieldValue::Code(s)
            | FieldValue::Date(s)
            | FieldValue::DateTime(s)
            | FieldValue::Time(s)
            | FieldValue::Instant(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Decimal(n) => Value::Number(n.clone()),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Complex(value) => value.clone(),
        }
    }

    /// String content of primitive values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s)
            | FieldValue::Code(s)
            | FieldValue::Date(s)
            | FieldValue::DateTime(s)
            | FieldValue::Time(s)
            | FieldValue::Instant(s) => Some(s),
            _ => None,
        }
    }
}

/// Per-call inputs for a converter
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    /// Code table hint declared on the rule (`0203`, `HL70001`)
    pub table: Option<&'a str>,
    /// Reject temporal values that are not real calendar dates
    pub validate_calendar: bool,
}

impl Default for ConvertContext<'_> {
    fn default() -> Self {
        Self {
            table: None,
            validate_calendar: true,
        }
    }
}

/// Signature shared by all converters
pub type ConvertFn =
    fn(RawValue<'_>, &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError>;

/// Named converters available to rules
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: IndexMap<String, ConvertFn>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ConverterRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            converters: IndexMap::new(),
        }
    }

    /// A registry with every built-in converter and its HL7 alias
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let builtins: [(&str, &[&str], ConvertFn); 15] = [
            ("string", &["ST", "TX", "FT"], to_string),
            ("integer", &["SI"], to_integer),
            ("decimal", &["NM"], to_decimal),
            ("boolean", &[], to_boolean),
            ("code", &["ID", "IS"], to_code),
            ("date", &["DT"], to_date),
            ("dateTime", &["DTM", "TS"], to_date_time),
            ("time", &["TM"], to_time),
            ("instant", &[], to_instant),
            ("Coding", &[], to_coding),
            ("CodeableConcept", &["CWE", "CE", "CNE"], to_codeable_concept),
            ("Identifier", &["CX"], to_identifier),
            ("HumanName", &["XPN"], to_human_name),
            ("ContactPoint", &["XTN"], to_contact_point),
            ("Address", &["XAD"], to_address),
        ];
        for (name, aliases, convert) in builtins {
            registry.register(name, convert);
            for alias in aliases {
                registry.register(*alias, convert);
            }
        }
        registry
    }

    /// Register or replace a converter
    pub fn register(&mut self, name: impl Into<String>, convert: ConvertFn) {
        self.converters.insert(name.into(), convert);
    }

    pub fn get(&self, name: &str) -> Option<ConvertFn> {
        self.converters.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.converters.keys().map(String::as_str)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Canonical system URI for an HL7 v2 table (`0203`, `HL70203`)
pub fn table_system(table: &str) -> String {
    let digits: String = table.chars().filter(char::is_ascii_digit).collect();
    format!("http://terminology.hl7.org/CodeSystem/v2-{digits:0>4}")
}

/// Map a coding system name from CWE-3 to a URI
pub fn coding_system(name: &str) -> String {
    match name.trim() {
        "LN" | "LOINC" => "http://loinc.org".to_string(),
        "SCT" | "SNM" | "SNOMEDCT" => "http://snomed.info/sct".to_string(),
        "I10" | "I10C" | "ICD10CM" => "http://hl7.org/fhir/sid/icd-10-cm".to_string(),
        "I9" | "I9C" => "http://hl7.org/fhir/sid/icd-9-cm".to_string(),
        "UCUM" => "http://unitsofmeasure.org".to_string(),
        "RXN" | "RXNORM" => "http://www.nlm.nih.gov/research/umls/rxnorm".to_string(),
        "CVX" => "http://hl7.org/fhir/sid/cvx".to_string(),
        other
            if other.len() > 3
                && other.starts_with("HL7")
                && other[3..].chars().all(|c| c.is_ascii_digit()) =>
        {
            table_system(other)
        }
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_digit() || c == '.') => {
            format!("urn:oid:{other}")
        }
        other => format!("urn:id:{other}"),
    }
}

fn object(entries: impl IntoIterator<Item = (&'static str, Option<Value>)>) -> Option<Value> {
    let map: Map<String, Value> = entries
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect();
    (!map.is_empty()).then_some(Value::Object(map))
}

fn string(value: Option<&str>) -> Option<Value> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
}

fn to_string(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    Ok(raw.text().map(|t| FieldValue::String(t.to_string())))
}

fn to_code(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    Ok(raw.text().map(|t| FieldValue::Code(t.to_string())))
}

fn to_integer(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let Some(text) = raw.text() else {
        return Ok(None);
    };
    text.trim_start_matches('+')
        .parse::<i64>()
        .map(|i| Some(FieldValue::Integer(i)))
        .map_err(|_| ConversionError::invalid_value(text, "integer"))
}

fn to_decimal(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let Some(text) = raw.text() else {
        return Ok(None);
    };
    let normalized = text.trim_start_matches('+');
    let normalized = if normalized.starts_with('.') {
        format!("0{normalized}")
    } else if let Some(rest) = normalized.strip_prefix("-.") {
        format!("-0.{rest}")
    } else {
        normalized.to_string()
    };
    normalized
        .parse::<Number>()
        .map(|n| Some(FieldValue::Decimal(n)))
        .map_err(|_| ConversionError::invalid_value(text, "decimal"))
}

fn to_boolean(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let Some(text) = raw.text() else {
        return Ok(None);
    };
    match text.to_ascii_uppercase().as_str() {
        "Y" | "YES" | "T" | "TRUE" | "1" => Ok(Some(FieldValue::Boolean(true))),
        "N" | "NO" | "F" | "FALSE" | "0" => Ok(Some(FieldValue::Boolean(false))),
        _ => Err(ConversionError::invalid_value(text, "boolean")),
    }
}

fn temporal(
    raw: RawValue<'_>,
    ctx: &ConvertContext<'_>,
    has_date_part: bool,
    target: &str,
) -> Result<Option<String>, ConversionError> {
    let Some(text) = raw.text() else {
        return Ok(None);
    };
    let canonical = temporal::parse(text, has_date_part)
        .ok_or_else(|| ConversionError::invalid_value(text, target))?;
    if ctx.validate_calendar && !temporal::is_valid_calendar(&canonical, has_date_part) {
        return Err(ConversionError::invalid_value(text, target));
    }
    Ok(Some(canonical))
}

fn to_date(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let value = temporal(raw, ctx, true, "date")?;
    Ok(value.map(|v| {
        let date = v.split_once('T').map_or(v.as_str(), |(date, _)| date);
        FieldValue::Date(date.to_string())
    }))
}

fn to_date_time(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    Ok(temporal(raw, ctx, true, "dateTime")?.map(FieldValue::DateTime))
}

fn to_time(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    Ok(temporal(raw, ctx, false, "time")?.map(FieldValue::Time))
}

fn to_instant(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let Some(value) = temporal(raw, ctx, true, "instant")? else {
        return Ok(None);
    };
    if temporal::precision(&value) < Precision::Second {
        return Err(ConversionError::invalid_value(value, "instant"));
    }
    Ok(Some(FieldValue::Instant(value)))
}

fn coding_at(raw: &RawValue<'_>, first: usize, table: Option<&str>) -> Option<Value> {
    let code = raw.component(first);
    let display = raw.component(first + 1);
    if code.is_none() && display.is_none() {
        return None;
    }
    let system = raw
        .component(first + 2)
        .map(coding_system)
        .or_else(|| table.map(table_system));
    object([
        ("system", system.map(Value::String)),
        ("code", string(code)),
        ("display", string(display)),
    ])
}

fn to_coding(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    Ok(coding_at(&raw, 1, ctx.table).map(FieldValue::Complex))
}

fn to_codeable_concept(raw: RawValue<'_>, ctx: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let codings: Vec<Value> = [coding_at(&raw, 1, ctx.table), coding_at(&raw, 4, None)]
        .into_iter()
        .flatten()
        .collect();
    let text = raw.component(9).or_else(|| raw.component(2));
    let concept = object([
        ("coding", (!codings.is_empty()).then(|| Value::Array(codings))),
        ("text", string(text)),
    ]);
    Ok(concept.map(FieldValue::Complex))
}

fn to_identifier(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let Some(value) = raw.component(1) else {
        return Ok(None);
    };
    let system = raw
        .subcomponent(4, 2)
        .filter(|_| raw.subcomponent(4, 3).is_some())
        .map(coding_system)
        .or_else(|| raw.subcomponent(4, 1).map(|ns| format!("urn:id:{}", ns.trim())));
    let id_type = raw.component(5).map(|code| {
        json!({
            "coding": [{
                "system": table_system("0203"),
                "code": code.trim(),
            }]
        })
    });
    let identifier = object([
        ("type", id_type),
        ("system", system.map(Value::String)),
        ("value", string(Some(value))),
    ]);
    Ok(identifier.map(FieldValue::Complex))
}

fn name_use(code: &str) -> Option<&'static str> {
    match code {
        "L" => Some("official"),
        "D" => Some("usual"),
        "A" | "N" | "S" => Some("nickname"),
        "M" => Some("maiden"),
        "T" => Some("temp"),
        _ => None,
    }
}

fn to_human_name(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let family = raw.subcomponent(1, 1);
    let given: Vec<Value> = [raw.component(2), raw.component(3)]
        .into_iter()
        .filter_map(string)
        .collect();
    let name = object([
        ("use", raw.component(7).and_then(name_use).map(Value::from)),
        ("family", string(family)),
        ("given", (!given.is_empty()).then(|| Value::Array(given))),
        ("suffix", string(raw.component(4)).map(|s| Value::Array(vec![s]))),
        ("prefix", string(raw.component(5)).map(|p| Value::Array(vec![p]))),
    ]);
    Ok(name.map(FieldValue::Complex))
}

fn to_contact_point(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let equipment = raw.component(3).map(str::trim);
    let email = raw.component(4);
    let (system, value) = match (equipment, email) {
        (Some("Internet") | Some("X.400"), Some(address)) => ("email", Some(address)),
        (Some("FX"), _) => ("fax", raw.component(12).or_else(|| raw.component(1))),
        (Some("BP"), _) => ("pager", raw.component(12).or_else(|| raw.component(1))),
        _ => ("phone", raw.component(12).or_else(|| raw.component(1))),
    };
    let Some(value) = string(value) else {
        return Ok(None);
    };
    let contact_use = match raw.component(2).map(str::trim) {
        Some("PRN") | Some("ORN") | Some("VHN") => Some("home"),
        Some("WPN") => Some("work"),
        _ if equipment == Some("CP") => Some("mobile"),
        _ => None,
    };
    let contact = object([
        ("system", Some(Value::from(system))),
        ("value", Some(value)),
        ("use", contact_use.map(Value::from)),
    ]);
    Ok(contact.map(FieldValue::Complex))
}

fn to_address(raw: RawValue<'_>, _: &ConvertContext<'_>) -> Result<Option<FieldValue>, ConversionError> {
    let lines: Vec<Value> = [raw.subcomponent(1, 1), raw.component(2)]
        .into_iter()
        .filter_map(string)
        .collect();
    let address_use = match raw.component(7).map(str::trim) {
        Some("H") => Some("home"),
        Some("O") | Some("B") => Some("work"),
        Some("C") => Some("temp"),
        Some("BA") => Some("old"),
        _ => None,
    };
    let address = object([
        ("use", address_use.map(Value::from)),
        ("line", (!lines.is_empty()).then(|| Value::Array(lines))),
        ("city", string(raw.component(3))),
        ("state", string(raw.component(4))),
        ("postalCode", string(raw.component(5))),
        ("country", string(raw.component(6))),
    ]);
    Ok(address.map(FieldValue::Complex))
}
