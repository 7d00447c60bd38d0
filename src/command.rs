//! ## Commands
//!
//! Declarative command descriptors, their override layers and the command table a
//! profile registers them in.
//!
//! A command's effective configuration is resolved on every access: each field is looked
//! up in the override layers, highest priority first, and falls back to the declared
//! default. Only commands declared `dynamic` consult the layers.
//!

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::coder::{
    accept_any, format_template, identity, verbatim, CommandFormatter, Processor, Validator,
    Value, Values,
};
use crate::constants::session::DEFAULT_SEPARATOR;
use crate::error::{Error, Result};

// ==========
// Overrides
// ==========

/// ### Field
///
/// A field of a command descriptor that can be overridden.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ReadTemplate,
    WriteTemplate,
    Validator,
    AllowedValues,
    UseValueMapping,
    DecodeFn,
    EncodeFn,
    CommandFormatFn,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::ReadTemplate,
        Field::WriteTemplate,
        Field::Validator,
        Field::AllowedValues,
        Field::UseValueMapping,
        Field::DecodeFn,
        Field::EncodeFn,
        Field::CommandFormatFn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::ReadTemplate => "read_template",
            Field::WriteTemplate => "write_template",
            Field::Validator => "validator",
            Field::AllowedValues => "allowed_values",
            Field::UseValueMapping => "use_value_mapping",
            Field::DecodeFn => "decode_fn",
            Field::EncodeFn => "encode_fn",
            Field::CommandFormatFn => "command_format_fn",
        }
    }

    /// The reserved name `<command>_<field>`.
    pub fn key(self, command: &str) -> String {
        format!("{command}_{}", self.name())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ### Override
///
/// A replacement value for one field of a dynamic command.
///
#[derive(Clone)]
pub enum Override {
    ReadTemplate(Option<String>),
    WriteTemplate(Option<String>),
    Validator(Validator),
    AllowedValues(Values),
    UseValueMapping(bool),
    DecodeFn(Processor),
    EncodeFn(Processor),
    CommandFormatFn(CommandFormatter),
}

impl Override {
    pub fn field(&self) -> Field {
        match self {
            Override::ReadTemplate(_) => Field::ReadTemplate,
            Override::WriteTemplate(_) => Field::WriteTemplate,
            Override::Validator(_) => Field::Validator,
            Override::AllowedValues(_) => Field::AllowedValues,
            Override::UseValueMapping(_) => Field::UseValueMapping,
            Override::DecodeFn(_) => Field::DecodeFn,
            Override::EncodeFn(_) => Field::EncodeFn,
            Override::CommandFormatFn(_) => Field::CommandFormatFn,
        }
    }

    pub fn read_template(template: &str) -> Override {
        Override::ReadTemplate(Some(template.to_string()))
    }

    pub fn write_template(template: &str) -> Override {
        Override::WriteTemplate(Some(template.to_string()))
    }

    pub fn validator<F>(f: F) -> Override
    where
        F: Fn(Value, &Values) -> Result<Value> + Send + Sync + 'static,
    {
        Override::Validator(Arc::new(f))
    }

    pub fn decode<F>(f: F) -> Override
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Override::DecodeFn(Arc::new(f))
    }

    pub fn encode<F>(f: F) -> Override
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Override::EncodeFn(Arc::new(f))
    }

    pub fn command_format<F>(f: F) -> Override
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Override::CommandFormatFn(Arc::new(f))
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::ReadTemplate(t) | Override::WriteTemplate(t) => {
                write!(f, "{}({t:?})", self.field())
            }
            Override::AllowedValues(values) => write!(f, "{}({values:?})", self.field()),
            Override::UseValueMapping(flag) => write!(f, "{}({flag})", self.field()),
            _ => write!(f, "{}(<fn>)", self.field()),
        }
    }
}

/// ### Overrides
///
/// One layer of field overrides keyed by `(command, field)`.
///
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    entries: HashMap<(String, Field), Override>,
}

impl Overrides {
    pub fn new() -> Overrides {
        Overrides::default()
    }

    /// Set an override, replacing any previous one for the same field.
    pub fn set(&mut self, command: &str, value: Override) {
        self.entries.insert((command.to_string(), value.field()), value);
    }

    pub fn get(&self, command: &str, field: Field) -> Option<&Override> {
        self.entries.get(&(command.to_string(), field))
    }

    pub fn remove(&mut self, command: &str, field: Field) -> Option<Override> {
        self.entries.remove(&(command.to_string(), field))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn retain(&mut self, mut keep: impl FnMut(&str, Field) -> bool) {
        self.entries.retain(|(command, field), _| keep(command, *field));
    }
}

// ==========
// Command Spec
// ==========

/// ### Command Spec
///
/// The declared configuration of one command. Build with `control`, `measurement` or
/// `setting` and refine with the builder methods.
///
#[derive(Clone)]
pub struct CommandSpec {
    read_template: Option<String>,
    write_template: Option<String>,
    docs: String,
    validator: Validator,
    values: Values,
    map_values: bool,
    decode: Processor,
    encode: Processor,
    command_format: CommandFormatter,
    separator: String,
    dynamic: bool,
}

impl CommandSpec {
    pub fn new(read_template: Option<&str>, write_template: Option<&str>, docs: &str) -> CommandSpec {
        CommandSpec {
            read_template: read_template.map(str::to_string),
            write_template: write_template.map(str::to_string),
            docs: docs.to_string(),
            validator: accept_any(),
            values: Values::Empty,
            map_values: false,
            decode: identity(),
            encode: identity(),
            command_format: verbatim(),
            separator: DEFAULT_SEPARATOR.to_string(),
            dynamic: false,
        }
    }

    /// A command that can be both read and set.
    pub fn control(read_template: &str, write_template: &str, docs: &str) -> CommandSpec {
        CommandSpec::new(Some(read_template), Some(write_template), docs)
    }

    /// A read-only command.
    pub fn measurement(read_template: &str, docs: &str) -> CommandSpec {
        CommandSpec::new(Some(read_template), None, docs)
    }

    /// A write-only command.
    pub fn setting(write_template: &str, docs: &str) -> CommandSpec {
        CommandSpec::new(None, Some(write_template), docs)
    }

    pub fn validator<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &Values) -> Result<Value> + Send + Sync + 'static,
    {
        self.validator = Arc::new(f);
        self
    }

    pub fn values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn map_values(mut self, map_values: bool) -> Self {
        self.map_values = map_values;
        self
    }

    pub fn decode<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.decode = Arc::new(f);
        self
    }

    pub fn encode<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.encode = Arc::new(f);
        self
    }

    pub fn command_format<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.command_format = Arc::new(f);
        self
    }

    pub fn separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    /// Let sessions and derived tables override this command's fields.
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_readable(&self) -> bool {
        self.read_template.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.write_template.is_some()
    }

    pub fn docs(&self) -> String {
        if self.dynamic {
            format!("{}\n(dynamic)", self.docs)
        } else {
            self.docs.clone()
        }
    }

    /// ### Resolve
    ///
    /// The effective configuration of the command named `name`. `layers` are consulted
    /// highest priority first, field by field.
    ///
    pub fn resolve(&self, name: &str, layers: &[&Overrides]) -> Effective {
        let mut effective = Effective {
            read_template: self.read_template.clone(),
            write_template: self.write_template.clone(),
            validator: Arc::clone(&self.validator),
            values: self.values.clone(),
            map_values: self.map_values,
            decode: Arc::clone(&self.decode),
            encode: Arc::clone(&self.encode),
            command_format: Arc::clone(&self.command_format),
            separator: self.separator.clone(),
        };
        if !self.dynamic {
            return effective;
        }

        for field in Field::ALL {
            if let Some(value) = layers.iter().find_map(|layer| layer.get(name, field)) {
                effective.apply(value.clone());
            }
        }
        effective
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.read_template.is_none() && self.write_template.is_none() {
            return Err(Error::InvalidDeclaration(format!(
                "command `{name}` has neither a read nor a write template"
            )));
        }
        if self.map_values && !self.values.supports_mapping() {
            return Err(Error::InvalidDeclaration(format!(
                "command `{name}` maps values but its allowed values are {:?}",
                self.values
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("read_template", &self.read_template)
            .field("write_template", &self.write_template)
            .field("values", &self.values)
            .field("map_values", &self.map_values)
            .field("separator", &self.separator)
            .field("dynamic", &self.dynamic)
            .finish_non_exhaustive()
    }
}

// ==========
// Effective Configuration
// ==========

/// ### Effective
///
/// A command's configuration after override resolution. Runs the read and write
/// transactions against any wire, given as closures.
///
pub struct Effective {
    pub read_template: Option<String>,
    pub write_template: Option<String>,
    pub validator: Validator,
    pub values: Values,
    pub map_values: bool,
    pub decode: Processor,
    pub encode: Processor,
    pub command_format: CommandFormatter,
    pub separator: String,
}

impl Effective {
    fn apply(&mut self, value: Override) {
        match value {
            Override::ReadTemplate(t) => self.read_template = t,
            Override::WriteTemplate(t) => self.write_template = t,
            Override::Validator(f) => self.validator = f,
            Override::AllowedValues(values) => self.values = values,
            Override::UseValueMapping(flag) => self.map_values = flag,
            Override::DecodeFn(f) => self.decode = f,
            Override::EncodeFn(f) => self.encode = f,
            Override::CommandFormatFn(f) => self.command_format = f,
        }
    }

    /// ### Read
    ///
    /// `query(command, separator)` performs the wire read and returns the reply tokens.
    ///
    pub fn read<Q>(&self, name: &str, query: Q) -> Result<Value>
    where
        Q: FnOnce(&str, &str) -> Result<Vec<Value>>,
    {
        let template = self
            .read_template
            .as_deref()
            .ok_or_else(|| Error::unreadable(name))?;
        let command = (self.command_format)(template);

        let mut tokens = query(&command, &self.separator)?;
        if tokens.len() != 1 {
            return (self.decode)(Value::List(tokens));
        }

        let value = (self.decode)(tokens.remove(0))?;
        if self.map_values {
            self.values.decode(&value)
        } else {
            Ok(value)
        }
    }

    /// ### Write
    ///
    /// Validate, encode and format `value`, then hand the command to `send`. Nothing is
    /// sent when any step fails.
    ///
    pub fn write<S>(&self, name: &str, value: Value, send: S) -> Result<()>
    where
        S: FnOnce(&str) -> Result<()>,
    {
        let template = self
            .write_template
            .as_deref()
            .ok_or_else(|| Error::unwritable(name))?;

        let value = (self.encode)((self.validator)(value, &self.values)?)?;
        let value = if self.map_values {
            self.values.encode(&value)?
        } else {
            value
        };

        let command = format_template(&(self.command_format)(template), &value)?;
        send(&command)
    }
}

// ==========
// Command Table
// ==========

/// ### Command Table
///
/// The immutable registry of an instrument family's commands and its class-level
/// overrides.
///
#[derive(Debug, Clone)]
pub struct CommandTable {
    name: String,
    commands: Vec<(String, Arc<CommandSpec>)>,
    class_overrides: Overrides,
}

impl CommandTable {
    pub fn builder(name: &str) -> CommandTableBuilder {
        CommandTableBuilder {
            name: name.to_string(),
            commands: Vec::new(),
            class_overrides: Overrides::new(),
            declared: Vec::new(),
            overridden: Vec::new(),
            duplicate: None,
        }
    }

    /// A table with no commands.
    pub fn empty(name: &str) -> CommandTable {
        CommandTable {
            name: name.to_string(),
            commands: Vec::new(),
            class_overrides: Overrides::new(),
        }
    }

    /// ### Derive
    ///
    /// Start a table that inherits every command and class override of this one.
    /// Redeclaring an inherited command replaces it and drops its inherited overrides.
    ///
    pub fn derive(&self, name: &str) -> CommandTableBuilder {
        CommandTableBuilder {
            name: name.to_string(),
            commands: self.commands.clone(),
            class_overrides: self.class_overrides.clone(),
            declared: Vec::new(),
            overridden: Vec::new(),
            duplicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands
            .iter()
            .find(|(command, _)| command == name)
            .map(|(_, spec)| spec.as_ref())
    }

    /// Command names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn class_overrides(&self) -> &Overrides {
        &self.class_overrides
    }

    /// ### Override Namespace
    ///
    /// Every `<command>_<field>` key of the dynamic commands.
    ///
    pub fn override_namespace(&self) -> BTreeSet<String> {
        self.commands
            .iter()
            .filter(|(_, spec)| spec.dynamic)
            .flat_map(|(name, _)| Field::ALL.into_iter().map(move |field| field.key(name)))
            .collect()
    }

    /// ### Lookup
    ///
    /// The declared command `name`. Reserved override keys are refused.
    ///
    pub fn lookup(&self, name: &str) -> Result<&CommandSpec> {
        if self.is_reserved(name) {
            return Err(Error::ReservedName(name.to_string()));
        }
        self.get(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }

    fn is_reserved(&self, name: &str) -> bool {
        Field::ALL.into_iter().any(|field| {
            name.strip_suffix(field.name())
                .and_then(|prefix| prefix.strip_suffix('_'))
                .and_then(|command| self.get(command))
                .is_some_and(CommandSpec::is_dynamic)
        })
    }

    /// Check that `field` of `command` may be overridden.
    pub fn check_override(&self, command: &str, field: Field) -> Result<()> {
        match self.get(command) {
            None => Err(Error::UnknownCommand(command.to_string())),
            Some(spec) if !spec.dynamic => Err(Error::NotOverridable(field.key(command))),
            Some(_) => Ok(()),
        }
    }
}

/// ### Command Table Builder
///
/// Collects declarations; `build` validates them all at once.
///
pub struct CommandTableBuilder {
    name: String,
    commands: Vec<(String, Arc<CommandSpec>)>,
    class_overrides: Overrides,
    declared: Vec<String>,
    overridden: Vec<(String, Field)>,
    duplicate: Option<String>,
}

impl CommandTableBuilder {
    pub fn command(mut self, name: &str, spec: CommandSpec) -> Self {
        if self.declared.iter().any(|declared| declared == name) {
            self.duplicate.get_or_insert_with(|| name.to_string());
            return self;
        }
        self.declared.push(name.to_string());

        match self.commands.iter().position(|(command, _)| command == name) {
            Some(index) => {
                let overridden = &self.overridden;
                self.class_overrides.retain(|command, field| {
                    command != name || overridden.contains(&(command.to_string(), field))
                });
                self.commands[index].1 = Arc::new(spec);
            }
            None => self.commands.push((name.to_string(), Arc::new(spec))),
        }
        self
    }

    /// Class-level override, shared by every session of this table.
    pub fn set(mut self, command: &str, value: Override) -> Self {
        self.overridden.push((command.to_string(), value.field()));
        self.class_overrides.set(command, value);
        self
    }

    pub fn build(self) -> Result<CommandTable> {
        if let Some(name) = self.duplicate {
            return Err(Error::InvalidDeclaration(format!(
                "command `{name}` is declared twice in `{}`",
                self.name
            )));
        }

        let table = CommandTable {
            name: self.name,
            commands: self.commands,
            class_overrides: self.class_overrides,
        };

        for (name, spec) in &table.commands {
            spec.check(name)?;
        }

        let namespace = table.override_namespace();
        if let Some(clash) = table.names().find(|name| namespace.contains(*name)) {
            return Err(Error::InvalidDeclaration(format!(
                "command `{clash}` collides with a reserved override name"
            )));
        }

        for (command, field) in &self.overridden {
            table
                .check_override(command, *field)
                .map_err(|e| Error::InvalidDeclaration(e.to_string()))?;
        }
        Ok(table)
    }
}
