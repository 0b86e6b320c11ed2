use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The declarative unit produced by generation and consumed by execution.
///
/// Exactly one of `code` or `logic` is the live execution path per app; both
/// may be present for legacy/migration reasons, in which case `code` wins.
/// The wire format is camelCase because configs originate from the JS-side
/// generator and are stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Schema version tag (e.g. "1.0").
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: AppMetadata,
    #[serde(default)]
    pub inputs: Vec<InputField>,
    /// Single-entry-point script for the sandboxed executor path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Ordered logic blocks for the declarative interpreter path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Vec<LogicBlock>>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<DataSchema>,
}

impl AppConfig {
    /// Whether the sandboxed-code path is the live path for this app.
    pub fn uses_code_path(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Check the structural invariant that input ids are unique.
    pub fn duplicate_input_id(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.inputs
            .iter()
            .find(|f| !seen.insert(f.id.as_str()))
            .map(|f| f.id.as_str())
    }
}

/// Display-only app metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
}

/// One declared form input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: InputType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Choices for select/multiselect/radio.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub help_text: String,
}

impl InputField {
    pub fn new(id: &str, field_type: InputType) -> Self {
        Self {
            id: id.to_string(),
            field_type,
            label: String::new(),
            placeholder: String::new(),
            required: false,
            default_value: None,
            options: Vec::new(),
            help_text: String::new(),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// The fixed set of semantic input types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Textarea,
    Number,
    Email,
    Url,
    Date,
    Datetime,
    Time,
    Select,
    Multiselect,
    Checkbox,
    Radio,
    File,
    Richtext,
    Color,
    Range,
}

impl InputType {
    /// The fallback value a field resolves to when no value and no declared
    /// default are present.
    pub fn zero_value(&self) -> Value {
        match self {
            InputType::Number | InputType::Range => Value::from(0.0),
            InputType::Checkbox => Value::Bool(false),
            InputType::Multiselect => Value::Array(Vec::new()),
            InputType::Date | InputType::Datetime | InputType::Time => Value::Null,
            _ => Value::String(String::new()),
        }
    }
}

/// One declared output slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub output_type: OutputType,
    #[serde(default)]
    pub label: String,
    /// Literal string or a `{{path}}` reference into execution state.
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Text,
    Markdown,
    Json,
    Table,
    Chart,
    Image,
    Download,
    Copy,
    List,
    Card,
}

/// Declared shape of persisted app data, informing `data_store`/`data_query`
/// blocks and the `db` helpers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub fields: Vec<DataField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
}

/// One step of the declarative execution path.
///
/// Blocks execute in array order; block N+1 always observes the side effects
/// of block N. `conditional` and `loop` carry nested block lists which are
/// walked recursively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicBlock {
    #[serde(rename_all = "camelCase")]
    AiProcess {
        #[serde(default)]
        id: String,
        #[serde(default)]
        system_prompt: String,
        user_prompt_template: String,
        output_variable: String,
    },
    #[serde(rename_all = "camelCase")]
    Variable {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    Transform {
        #[serde(default)]
        id: String,
        #[serde(default)]
        operation: String,
        input_variable: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable: Option<String>,
        /// Operation options, e.g. a format kind or a separator.
        #[serde(default)]
        options: BTreeMap<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    DataStore {
        #[serde(default)]
        id: String,
        data_type: String,
        /// Record key -> template value; each value is interpolated against
        /// the current context before the record is persisted.
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    DataQuery {
        #[serde(default)]
        id: String,
        data_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
        output_variable: String,
    },
    #[serde(rename_all = "camelCase")]
    Conditional {
        #[serde(default)]
        id: String,
        condition: String,
        #[serde(default)]
        then_blocks: Vec<LogicBlock>,
        #[serde(default)]
        else_blocks: Vec<LogicBlock>,
    },
    #[serde(rename_all = "camelCase")]
    Loop {
        #[serde(default)]
        id: String,
        source_variable: String,
        item_variable: String,
        #[serde(default)]
        blocks: Vec<LogicBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_variable: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ApiCall {
        #[serde(default)]
        id: String,
        url: String,
        #[serde(default)]
        method: String,
        #[serde(default)]
        query_params: BTreeMap<String, String>,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_template: Option<String>,
        output_variable: String,
    },
}

impl LogicBlock {
    /// The block's declared id, used for per-block context flags.
    pub fn id(&self) -> &str {
        match self {
            LogicBlock::AiProcess { id, .. }
            | LogicBlock::Variable { id, .. }
            | LogicBlock::Transform { id, .. }
            | LogicBlock::DataStore { id, .. }
            | LogicBlock::DataQuery { id, .. }
            | LogicBlock::Conditional { id, .. }
            | LogicBlock::Loop { id, .. }
            | LogicBlock::ApiCall { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LogicBlock::AiProcess { .. } => "ai_process",
            LogicBlock::Variable { .. } => "variable",
            LogicBlock::Transform { .. } => "transform",
            LogicBlock::DataStore { .. } => "data_store",
            LogicBlock::DataQuery { .. } => "data_query",
            LogicBlock::Conditional { .. } => "conditional",
            LogicBlock::Loop { .. } => "loop",
            LogicBlock::ApiCall { .. } => "api_call",
        }
    }
}
