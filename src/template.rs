use crate::errors::{DaemonError, Result};
use crate::receipt::{Command, Receipt, VariableArray};
use serde_json::Value;
use std::collections::HashMap;

/// Caller-supplied values for template variables, by variable name.
pub type VariableData = HashMap<String, Value>;

/// Caller-supplied rows for variable arrays: array name to a list of
/// field-name → value maps.
pub type VariableArrayData = HashMap<String, Vec<HashMap<String, Value>>>;

/// Substitutes variable and array references in a receipt's command list.
///
/// Array-bound commands expand to one copy per data row; when no data is
/// supplied the schema's default values produce a single preview row.
pub struct Resolver<'a> {
    receipt: &'a Receipt,
    variables: VariableData,
    arrays: VariableArrayData,
}

impl<'a> Resolver<'a> {
    pub fn new(receipt: &'a Receipt) -> Self {
        Self {
            receipt,
            variables: HashMap::new(),
            arrays: HashMap::new(),
        }
    }

    pub fn with_variables(mut self, variables: VariableData) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_arrays(mut self, arrays: VariableArrayData) -> Self {
        self.arrays = arrays;
        self
    }

    /// Produce the fully-substituted, array-expanded command list.
    pub fn resolve(&self) -> Result<Vec<Command>> {
        let mut resolved = Vec::new();
        for command in &self.receipt.commands {
            if command.array_binding.is_empty() {
                resolved.push(self.resolve_command(command));
            } else {
                resolved.extend(self.expand_array_command(command)?);
            }
        }
        Ok(resolved)
    }

    fn expand_array_command(&self, command: &Command) -> Result<Vec<Command>> {
        let array_name = &command.array_binding;
        let schema = self
            .receipt
            .variable_arrays
            .iter()
            .find(|array| &array.name == array_name)
            .ok_or_else(|| {
                DaemonError::Validation(format!("unknown variable array: {array_name}"))
            })?;

        let default_row = || {
            schema
                .schema
                .iter()
                .map(|field| {
                    (
                        field.field.clone(),
                        field.default_value.clone().unwrap_or(Value::Null),
                    )
                })
                .collect::<HashMap<_, _>>()
        };

        let rows: Vec<HashMap<String, Value>> = match self.arrays.get(array_name) {
            Some(rows) if !rows.is_empty() => rows.clone(),
            _ => vec![default_row()],
        };

        let mut expanded = Vec::with_capacity(rows.len());
        for row in &rows {
            let filled = self.fill_array_fields(command, schema, row);
            expanded.push(self.resolve_command(&filled));
        }
        Ok(expanded)
    }

    /// Replace `arrayField` references with the row's values, recursing into
    /// nested command lists. The binding itself is stripped from the copy.
    fn fill_array_fields(
        &self,
        command: &Command,
        schema: &VariableArray,
        row: &HashMap<String, Value>,
    ) -> Command {
        let mut filled = command.clone();
        filled.array_binding = String::new();

        if !filled.array_field.is_empty() {
            if let Some(field) = schema
                .schema
                .iter()
                .find(|field| field.field == filled.array_field)
            {
                let value = row
                    .get(&field.field)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .or_else(|| field.default_value.clone())
                    .unwrap_or(Value::Null);
                filled.value = format_value(&value, &field.prefix, &field.suffix);
                filled.array_field = String::new();
            }
        }

        filled.left_side = filled
            .left_side
            .iter()
            .map(|inner| self.fill_array_fields(inner, schema, row))
            .collect();
        filled.right_side = filled
            .right_side
            .iter()
            .map(|inner| self.fill_array_fields(inner, schema, row))
            .collect();
        filled.commands = filled
            .commands
            .iter()
            .map(|inner| self.fill_array_fields(inner, schema, row))
            .collect();

        filled
    }

    /// Replace a `dynamicValue` reference with caller data or the variable's
    /// default, recursing into nested command lists.
    fn resolve_command(&self, command: &Command) -> Command {
        let mut resolved = command.clone();

        if !resolved.dynamic_value.is_empty() {
            if let Some(variable) = self
                .receipt
                .variables
                .iter()
                .find(|variable| variable.let_ == resolved.dynamic_value)
            {
                let value = self
                    .variables
                    .get(&variable.let_)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .or_else(|| variable.default_value.clone())
                    .unwrap_or(Value::Null);
                resolved.value = format_value(&value, &variable.prefix, &variable.suffix);
                resolved.dynamic_value = String::new();
            }
        }

        resolved.left_side = resolved
            .left_side
            .iter()
            .map(|inner| self.resolve_command(inner))
            .collect();
        resolved.right_side = resolved
            .right_side
            .iter()
            .map(|inner| self.resolve_command(inner))
            .collect();
        resolved.commands = resolved
            .commands
            .iter()
            .map(|inner| self.resolve_command(inner))
            .collect();

        resolved
    }
}

/// Render a JSON value as receipt text with optional prefix/suffix.
fn format_value(value: &Value, prefix: &str, suffix: &str) -> String {
    let rendered = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    format!("{prefix}{rendered}{suffix}")
}
