// 🏛️ Field Registry - the declared field set of a catalog entry
// Every field a toolinfo record may carry is declared here once, with its kind
// and constraints. The normalizer, validator and merge engine all read from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FIELD KINDS & RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    /// Short string (CharField)
    String,
    /// Long free text
    Text,
    Boolean,
    /// Ordered list of strings
    StringList,
    /// Ordered list of `{url, language}` objects
    ObjectList,
    /// RFC 3339 timestamp, set by the system
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationRule {
    Required,
    NonEmpty,
    MaxLength(usize),
    Pattern(String),
    Choice(Vec<String>),
    /// Accepts a bare scalar on input, always stored as a list
    ArrayOrScalar,
    /// Written by the system, never taken from incoming records
    ReadOnly,
}

// ============================================================================
// ATTRIBUTE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Field name as it appears in a toolinfo record (e.g. "title")
    pub name: String,

    pub type_: AttributeType,

    /// What does this field mean?
    pub description: String,

    pub validation_rules: Vec<ValidationRule>,

    pub examples: Vec<String>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, type_: AttributeType) -> Self {
        AttributeDefinition {
            name: name.into(),
            type_,
            description: String::new(),
            validation_rules: Vec::new(),
            examples: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add validation rule
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Builder: add example
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.validation_rules.contains(&ValidationRule::Required)
    }

    pub fn is_array_or_scalar(&self) -> bool {
        self.validation_rules.contains(&ValidationRule::ArrayOrScalar)
    }

    pub fn is_read_only(&self) -> bool {
        self.validation_rules.contains(&ValidationRule::ReadOnly)
    }

    pub fn max_length(&self) -> Option<usize> {
        self.validation_rules.iter().find_map(|rule| match rule {
            ValidationRule::MaxLength(n) => Some(*n),
            _ => None,
        })
    }
}

// ============================================================================
// ATTRIBUTE REGISTRY
// ============================================================================

/// Catalog of every field a tool record may carry.
///
/// Keyed by field name; iteration is in name order so anything derived from
/// the registry (error ordering, field lists) is deterministic.
pub struct AttributeRegistry {
    attributes: BTreeMap<String, AttributeDefinition>,
}

pub const TOOL_TYPE_CHOICES: &[&str] = &[
    "web app",
    "desktop app",
    "bot",
    "gadget",
    "user script",
    "command line tool",
    "coding framework",
    "other",
];

impl AttributeRegistry {
    /// Create a registry with all catalog fields registered
    pub fn new() -> Self {
        let mut registry = AttributeRegistry {
            attributes: BTreeMap::new(),
        };

        registry.register_tool_attributes();
        registry
    }

    fn register_tool_attributes(&mut self) {
        // ====================================================================
        // IDENTITY & CORE DESCRIPTION
        // ====================================================================

        self.register(
            AttributeDefinition::new("name", AttributeType::String)
                .with_description("Unique identifier for this tool, a URL-safe slug")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::NonEmpty)
                .with_validation(ValidationRule::MaxLength(255))
                .with_example("toolforge-foo"),
        );

        self.register(
            AttributeDefinition::new("title", AttributeType::String)
                .with_description("Human readable tool name")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::NonEmpty)
                .with_validation(ValidationRule::MaxLength(255)),
        );

        self.register(
            AttributeDefinition::new("description", AttributeType::Text)
                .with_description("A longer description of the tool; may be empty on ingest")
                .with_validation(ValidationRule::MaxLength(65535)),
        );

        self.register(
            AttributeDefinition::new("url", AttributeType::String)
                .with_description("A direct link to the tool or to install instructions")
                .with_validation(ValidationRule::MaxLength(2047)),
        );

        self.register(
            AttributeDefinition::new("keywords", AttributeType::StringList)
                .with_description("Keywords; a comma-separated string is split on input")
                .with_example("wikidata, editing"),
        );

        // ====================================================================
        // OPTIONAL SCALARS
        // ====================================================================

        let short_strings = [
            ("author", "The primary tool developer"),
            ("subtitle", "Longer than the title, shorter than the description"),
            ("openhub_id", "The project ID on OpenHub"),
            ("bot_username", "Wikimedia username of the bot, without 'User:'"),
            ("license", "SPDX license identifier of the tool code"),
        ];
        for (name, desc) in short_strings {
            self.register(
                AttributeDefinition::new(name, AttributeType::String)
                    .with_description(desc)
                    .with_validation(ValidationRule::MaxLength(255)),
            );
        }

        let links = [
            ("repository", "Link to the repository where the code is hosted"),
            ("replaced_by", "Link to the replacement of a deprecated tool"),
            ("api_url", "Link to the tool's API"),
            ("translate_url", "Link to the tool's translation interface"),
            ("bugtracker_url", "Link to the tool's bug tracker"),
        ];
        for (name, desc) in links {
            self.register(
                AttributeDefinition::new(name, AttributeType::String)
                    .with_description(desc)
                    .with_validation(ValidationRule::MaxLength(2047)),
            );
        }

        self.register(
            AttributeDefinition::new("icon", AttributeType::String)
                .with_description("Wikimedia Commons file page of an icon for the tool")
                .with_validation(ValidationRule::MaxLength(2047))
                .with_validation(ValidationRule::Pattern(
                    r"^https://commons\.wikimedia\.org/wiki/File:.+\..+$".to_string(),
                ))
                .with_example("https://commons.wikimedia.org/wiki/File:Foo.svg"),
        );

        self.register(
            AttributeDefinition::new("tool_type", AttributeType::String)
                .with_description("The manner in which the tool is used")
                .with_validation(ValidationRule::MaxLength(32))
                .with_validation(ValidationRule::Choice(
                    TOOL_TYPE_CHOICES.iter().map(|c| c.to_string()).collect(),
                )),
        );

        self.register(
            AttributeDefinition::new("deprecated", AttributeType::Boolean)
                .with_description("Use of this tool is officially discouraged"),
        );

        self.register(
            AttributeDefinition::new("experimental", AttributeType::Boolean)
                .with_description("Tool is unstable and can change or go offline"),
        );

        self.register(
            AttributeDefinition::new("url_alternates", AttributeType::ObjectList)
                .with_description("Alternate links in other natural languages"),
        );

        // ====================================================================
        // ARRAY-OR-SCALAR LISTS
        // ====================================================================

        let lists = [
            ("for_wikis", "Wikis this tool can be used on"),
            ("sponsor", "Organizations that sponsored development"),
            ("available_ui_languages", "Languages the interface is translated into"),
            ("technology_used", "Programming languages and frameworks used"),
            ("developer_docs_url", "Links to developer documentation"),
            ("user_docs_url", "Links to user documentation"),
            ("feedback_url", "Where users can leave feedback"),
            ("privacy_policy_url", "Links to privacy policies"),
        ];
        for (name, desc) in lists {
            self.register(
                AttributeDefinition::new(name, AttributeType::StringList)
                    .with_description(desc)
                    .with_validation(ValidationRule::ArrayOrScalar),
            );
        }

        // ====================================================================
        // SCHEMA REFERENCES ($schema / $language on the wire)
        // ====================================================================

        self.register(
            AttributeDefinition::new("_schema", AttributeType::String)
                .with_description("URI identifying the toolinfo jsonschema revision")
                .with_validation(ValidationRule::MaxLength(32)),
        );

        self.register(
            AttributeDefinition::new("_language", AttributeType::String)
                .with_description("Language the record is written in (ISO 639)")
                .with_validation(ValidationRule::MaxLength(16))
                .with_validation(ValidationRule::Pattern(
                    r"^(x-.*|[A-Za-z]{2,3}(-.*)?)$".to_string(),
                ))
                .with_example("en")
                .with_example("zh-hant"),
        );

        // ====================================================================
        // AUDIT FIELDS
        // ====================================================================

        for name in ["created_by", "modified_by"] {
            self.register(
                AttributeDefinition::new(name, AttributeType::String)
                    .with_description("Actor attribution, set by the system")
                    .with_validation(ValidationRule::ReadOnly),
            );
        }

        for name in ["created_date", "modified_date"] {
            self.register(
                AttributeDefinition::new(name, AttributeType::DateTime)
                    .with_description("Timestamp, set by the system")
                    .with_validation(ValidationRule::ReadOnly),
            );
        }
    }

    /// Register a new attribute (replaces one with the same name)
    pub fn register(&mut self, attr: AttributeDefinition) {
        self.attributes.insert(attr.name.clone(), attr);
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Fields that accept a bare scalar and are stored as lists
    pub fn array_or_scalar_fields(&self) -> Vec<&str> {
        self.attributes
            .values()
            .filter(|attr| attr.is_array_or_scalar())
            .map(|attr| attr.name.as_str())
            .collect()
    }

    /// Fields merge never copies from an incoming record
    pub fn read_only_fields(&self) -> Vec<&str> {
        self.attributes
            .values()
            .filter(|attr| attr.is_read_only())
            .map(|attr| attr.name.as_str())
            .collect()
    }

    pub fn list_all(&self) -> Vec<&AttributeDefinition> {
        self.attributes.values().collect()
    }

    pub fn count(&self) -> usize {
        self.attributes.len()
    }
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
