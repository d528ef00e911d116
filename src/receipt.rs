use crate::errors::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported schema version.
const SCHEMA_VERSION: &str = "1.0";

const VALID_PAPER_WIDTHS: &[&str] = &["58mm", "80mm", "112mm"];
const VALID_VALUE_TYPES: &[&str] = &["string", "number", "double", "boolean"];

/// Root of a `.receipt` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Receipt {
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub paper_width: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    #[serde(
        default,
        rename = "variableArrays",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub variable_arrays: Vec<VariableArray>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// A template variable declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "let")]
    pub let_: String,
    #[serde(rename = "valueType", default, skip_serializing_if = "String::is_empty")]
    pub value_type: String,
    #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A repeatable data structure bound to commands via `arrayBinding`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableArray {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub schema: Vec<VariableArrayField>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableArrayField {
    pub field: String,
    #[serde(rename = "valueType", default, skip_serializing_if = "String::is_empty")]
    pub value_type: String,
    #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

/// A single receipt command. One struct for every command type keeps the
/// format forgiving: unknown combinations deserialize and validation decides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(
        rename = "arrayBinding",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub array_binding: String,

    // text / barcode / qrcode
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(
        rename = "dynamicValue",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub dynamic_value: String,
    #[serde(
        rename = "arrayField",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub array_field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub weight: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub size: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub align: String,

    // image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base64: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub threshold: u32,

    // feed
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub lines: u32,

    // divider
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub style: String,

    // barcode / qrcode options
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub height: u32,
    #[serde(
        rename = "error_correction",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub error_correction: String,

    // item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub left_side: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub right_side: Vec<Command>,

    // box / group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

impl Command {
    pub fn text(value: &str) -> Self {
        Self {
            kind: "text".into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn feed(lines: u32) -> Self {
        Self {
            kind: "feed".into(),
            lines,
            ..Default::default()
        }
    }

    pub fn cut() -> Self {
        Self {
            kind: "cut".into(),
            ..Default::default()
        }
    }
}

/// Parse a `.receipt` JSON document.
pub fn parse(data: &[u8]) -> Result<Receipt> {
    let receipt: Receipt = serde_json::from_slice(data)
        .map_err(|e| DaemonError::Validation(format!("invalid receipt JSON: {e}")))?;
    Ok(receipt)
}

/// Validate a receipt document before rendering.
pub fn validate(receipt: &Receipt) -> Result<()> {
    if receipt.version.is_empty() {
        return Err(DaemonError::Validation("version is required".into()));
    }
    if receipt.version != SCHEMA_VERSION {
        return Err(DaemonError::Validation(format!(
            "unsupported version: {} (expected {SCHEMA_VERSION})",
            receipt.version
        )));
    }

    if !receipt.paper_width.is_empty()
        && !VALID_PAPER_WIDTHS.contains(&receipt.paper_width.as_str())
    {
        return Err(DaemonError::Validation(format!(
            "invalid paper_width: {} (must be 58mm, 80mm, or 112mm)",
            receipt.paper_width
        )));
    }

    let mut variable_names = std::collections::HashSet::new();
    for (i, variable) in receipt.variables.iter().enumerate() {
        if variable.let_.is_empty() {
            return Err(DaemonError::Validation(format!(
                "variable[{i}]: 'let' is required"
            )));
        }
        if !variable_names.insert(variable.let_.clone()) {
            return Err(DaemonError::Validation(format!(
                "variable[{i}]: duplicate variable name '{}'",
                variable.let_
            )));
        }
        validate_value_type(&variable.value_type)
            .map_err(|e| DaemonError::Validation(format!("variable '{}': {e}", variable.let_)))?;
    }

    let mut array_names = std::collections::HashSet::new();
    for (i, array) in receipt.variable_arrays.iter().enumerate() {
        if array.name.is_empty() {
            return Err(DaemonError::Validation(format!(
                "variableArray[{i}]: 'name' is required"
            )));
        }
        if !array_names.insert(array.name.clone()) {
            return Err(DaemonError::Validation(format!(
                "variableArray[{i}]: duplicate array name '{}'",
                array.name
            )));
        }
        let mut field_names = std::collections::HashSet::new();
        for field in &array.schema {
            if field.field.is_empty() {
                return Err(DaemonError::Validation(format!(
                    "variableArray '{}': field name is required",
                    array.name
                )));
            }
            if !field_names.insert(field.field.clone()) {
                return Err(DaemonError::Validation(format!(
                    "variableArray '{}': duplicate field '{}'",
                    array.name, field.field
                )));
            }
            validate_value_type(&field.value_type).map_err(|e| {
                DaemonError::Validation(format!(
                    "variableArray '{}' field '{}': {e}",
                    array.name, field.field
                ))
            })?;
        }
    }

    if receipt.commands.is_empty() {
        return Err(DaemonError::Validation(
            "at least one command is required".into(),
        ));
    }
    for command in &receipt.commands {
        validate_command(command)?;
    }

    Ok(())
}

fn validate_value_type(value_type: &str) -> std::result::Result<(), String> {
    if value_type.is_empty() || VALID_VALUE_TYPES.contains(&value_type) {
        Ok(())
    } else {
        Err(format!("invalid valueType: {value_type}"))
    }
}

fn validate_command(command: &Command) -> Result<()> {
    match command.kind.as_str() {
        "text" => {
            if command.value.is_empty()
                && command.dynamic_value.is_empty()
                && command.array_field.is_empty()
            {
                return Err(DaemonError::Validation(
                    "text command requires value, dynamicValue, or arrayField".into(),
                ));
            }
        }
        "feed" => {
            if command.lines == 0 {
                return Err(DaemonError::Validation(
                    "feed command requires lines >= 1".into(),
                ));
            }
        }
        "image" => {
            if command.path.is_empty() && command.base64.is_empty() {
                return Err(DaemonError::Validation(
                    "image command requires path or base64".into(),
                ));
            }
        }
        "barcode" | "qrcode" => {
            if command.value.is_empty()
                && command.dynamic_value.is_empty()
                && command.array_field.is_empty()
            {
                return Err(DaemonError::Validation(format!(
                    "{} command requires a value",
                    command.kind
                )));
            }
        }
        "item" => {
            for side in command.left_side.iter().chain(command.right_side.iter()) {
                validate_command(side)?;
            }
        }
        "box" => {
            for inner in &command.commands {
                validate_command(inner)?;
            }
        }
        "cut" | "divider" => {}
        other => {
            return Err(DaemonError::Validation(format!(
                "unknown command type: {other}"
            )));
        }
    }
    Ok(())
}
