use crate::imports::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod coerce;
pub mod config;
pub mod layers;
pub mod middleware;
pub mod parsed;

/*
    Types:
    * ParameterType - Closed set of parameter types a flag or argument can declare
    * ParameterDefinition - Name, type, help, required flag, default and choices of one parameter
    * NamePolicy - Naming rules shared by parameters, layers and commands
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterType {
    #[default]
    String,
    #[serde(alias = "integer")]
    Int,
    Float,
    #[serde(alias = "boolean")]
    Bool,
    Date,
    #[serde(alias = "string-list")]
    StringList,
    #[serde(alias = "int-list", alias = "integer-list")]
    IntList,
    #[serde(alias = "float-list")]
    FloatList,
    Choice,
    #[serde(alias = "choice-list")]
    ChoiceList,
    File,
    #[serde(alias = "file-list")]
    FileList,
    #[serde(alias = "string-from-file")]
    StringFromFile,
    #[serde(alias = "string-from-files")]
    StringFromFiles,
    #[serde(alias = "object-from-file")]
    ObjectFromFile,
    #[serde(alias = "object-list-from-file")]
    ObjectListFromFile,
    #[serde(alias = "object-list-from-files")]
    ObjectListFromFiles,
    #[serde(alias = "string-list-from-file")]
    StringListFromFile,
    #[serde(alias = "string-list-from-files")]
    StringListFromFiles,
    #[serde(alias = "key-value")]
    KeyValue,
}

impl ParameterType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::StringList => "stringList",
            Self::IntList => "intList",
            Self::FloatList => "floatList",
            Self::Choice => "choice",
            Self::ChoiceList => "choiceList",
            Self::File => "file",
            Self::FileList => "fileList",
            Self::StringFromFile => "stringFromFile",
            Self::StringFromFiles => "stringFromFiles",
            Self::ObjectFromFile => "objectFromFile",
            Self::ObjectListFromFile => "objectListFromFile",
            Self::ObjectListFromFiles => "objectListFromFiles",
            Self::StringListFromFile => "stringListFromFile",
            Self::StringListFromFiles => "stringListFromFiles",
            Self::KeyValue => "keyValue",
        }
    }

    /// Types that accept several raw values, and so may only be the last positional argument.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::StringList
                | Self::IntList
                | Self::FloatList
                | Self::ChoiceList
                | Self::FileList
                | Self::StringFromFiles
                | Self::ObjectListFromFiles
                | Self::StringListFromFiles
                | Self::KeyValue
        )
    }

    pub fn needs_choices(&self) -> bool {
        matches!(self, Self::Choice | Self::ChoiceList)
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: ParameterType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
    #[serde(
        default,
        rename = "shortFlag",
        alias = "short-flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub short_flag: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ScalarValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            ty,
            help: String::new(),
            short_flag: None,
            required: false,
            default: None,
            choices: Vec::new(),
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn short_flag(mut self, short: impl Into<String>) -> Self {
        self.short_flag = Some(short.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<ScalarValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// A required parameter with a default is effectively optional.
    pub fn is_optional(&self) -> bool {
        !self.required || self.default.is_some()
    }

    /// Structural checks that do not need coercion: naming and choice presence.
    pub fn validate_shape(&self, context: &str) -> Result<()> {
        DEFAULT_NAME_POLICY.validate(&self.name, context)?;
        if self.ty.needs_choices() && self.choices.is_empty() {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "{} '{}' of type {} declares no choices",
                context, self.name, self.ty
            ))
            .into());
        }
        Ok(())
    }
}

pub struct NamePolicy {
    forbidden_regex: Regex,
}

impl NamePolicy {
    pub fn new(forbidden_pattern: &str) -> Self {
        Self {
            forbidden_regex: Regex::new(forbidden_pattern)
                .expect("NamePolicy: invalid forbidden_pattern regex"),
        }
    }

    pub fn validate(&self, name: &str, context: &str) -> Result<()> {
        if name.is_empty() {
            return Err(
                SqlCommandError::InvalidDescriptor(format!("{context} name must not be empty"))
                    .into(),
            );
        }
        if self.forbidden_regex.is_match(name) {
            return Err(SqlCommandError::InvalidDescriptor(format!(
                "{} name '{}' contains forbidden characters (pattern: {})",
                context,
                name,
                self.forbidden_regex.as_str()
            ))
            .into());
        }
        Ok(())
    }
}

pub static DEFAULT_NAME_POLICY: LazyLock<NamePolicy> =
    LazyLock::new(|| NamePolicy::new(r"[^a-zA-Z0-9_-]"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass_policy() {
        let policy = &*DEFAULT_NAME_POLICY;
        policy.validate("table", "flag").unwrap();
        policy.validate("print-query", "flag").unwrap();
        policy.validate("test2_id", "argument").unwrap();
    }

    #[test]
    fn forbidden_names_rejected() {
        for name in ["my flag", "store.path", "field!", ""] {
            let err = DEFAULT_NAME_POLICY.validate(name, "flag").unwrap_err();
            assert_eq!(error_kind(&err), Some(ErrorKind::InvalidDescriptor), "{name}");
        }
    }

    #[test]
    fn yaml_type_names_and_aliases() {
        let def: ParameterDefinition =
            serde_yaml::from_str("name: ids\ntype: intList\nhelp: ids to fetch").unwrap();
        assert_eq!(def.ty, ParameterType::IntList);
        assert!(def.ty.is_list());

        let def: ParameterDefinition = serde_yaml::from_str("name: n\ntype: integer").unwrap();
        assert_eq!(def.ty, ParameterType::Int);

        let def: ParameterDefinition = serde_yaml::from_str("name: kv\ntype: key-value").unwrap();
        assert_eq!(def.ty, ParameterType::KeyValue);

        let def: ParameterDefinition = serde_yaml::from_str("name: plain").unwrap();
        assert_eq!(def.ty, ParameterType::String);
    }

    #[test]
    fn unknown_definition_keys_rejected() {
        let res = serde_yaml::from_str::<ParameterDefinition>("name: x\ncolour: blue");
        assert!(res.is_err());
    }

    #[test]
    fn choice_without_choices_is_invalid() {
        let def = ParameterDefinition::new("output", ParameterType::Choice);
        let err = def.validate_shape("flag").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidDescriptor));
        def.choices(["json"]).validate_shape("flag").unwrap();
    }
}
