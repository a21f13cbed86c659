use crate::imports::*;
use serde::de::DeserializeOwned;

/*
    Types:
    * ParseStep - One write to a parameter: which source wrote which value
    * ParsedParameter - A parameter's current value plus the log of every write
    * ParsedLayer - Parsed parameters of one layer, in write order
    * ParsedLayers - Ordered slug -> ParsedLayer; later layers override earlier ones when flattened,
      and the `default` layer overrides them all
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ParseStep {
    pub source: String,
    pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParameter {
    pub name: String,
    pub value: ScalarValue,
    pub log: Vec<ParseStep>,
}

impl ParsedParameter {
    /// Source of the last write.
    pub fn source(&self) -> Option<&str> {
        self.log.last().map(|step| step.source.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLayer {
    pub layer: ParameterLayer,
    parameters: Vec<ParsedParameter>,
}

impl ParsedLayer {
    pub fn new(layer: ParameterLayer) -> Self {
        Self {
            layer,
            parameters: Vec::new(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.layer.slug
    }

    pub fn get(&self, name: &str) -> Option<&ParsedParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&ScalarValue> {
        self.get(name).map(|p| &p.value)
    }

    pub fn set(&mut self, name: &str, value: ScalarValue, source: &str) {
        let step = ParseStep {
            source: source.to_string(),
            value: value.clone(),
        };
        match self.parameters.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.log.push(step);
            }
            None => self.parameters.push(ParsedParameter {
                name: name.to_string(),
                value,
                log: vec![step],
            }),
        }
    }

    /// Replaces the value without logging a new write, used after coercion.
    pub(crate) fn replace_value(&mut self, name: &str, value: ScalarValue) {
        if let Some(existing) = self.parameters.iter_mut().find(|p| p.name == name) {
            existing.value = value;
        }
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParsedParameter> {
        self.parameters.iter()
    }

    pub fn to_map(&self) -> ScalarMap {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLayers {
    layers: Vec<ParsedLayer>,
}

impl ParsedLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// One empty parsed layer per declared layer, in declaration order.
    pub fn from_layers(layers: &ParameterLayers) -> Self {
        Self {
            layers: layers.iter().cloned().map(ParsedLayer::new).collect(),
        }
    }

    pub fn get(&self, slug: &str) -> Option<&ParsedLayer> {
        self.layers.iter().find(|layer| layer.slug() == slug)
    }

    pub fn get_mut(&mut self, slug: &str) -> Option<&mut ParsedLayer> {
        self.layers.iter_mut().find(|layer| layer.slug() == slug)
    }

    /// Returns the parsed layer for `slug`, appending an undeclared one if needed.
    pub fn get_or_insert(&mut self, slug: &str) -> &mut ParsedLayer {
        let index = match self.layers.iter().position(|layer| layer.slug() == slug) {
            Some(index) => index,
            None => {
                self.layers
                    .push(ParsedLayer::new(ParameterLayer::new(slug, slug)));
                self.layers.len() - 1
            }
        };
        &mut self.layers[index]
    }

    pub fn get_parameter(&self, slug: &str, name: &str) -> Option<&ScalarValue> {
        self.get(slug)?.value(name)
    }

    /// Convenience for embedders and tests: writes one value with the given source tag.
    pub fn set_value(
        &mut self,
        slug: &str,
        name: &str,
        value: impl Into<ScalarValue>,
        source: &str,
    ) -> &mut Self {
        self.get_or_insert(slug).set(name, value.into(), source);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParsedLayer> {
        self.layers.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParsedLayer> {
        self.layers.iter_mut()
    }

    /// Flattens every layer into one name -> value map. A later layer wins on collision,
    /// except that the command's own `default` layer is folded in last.
    pub fn get_data_map(&self) -> ScalarMap {
        let (own, others): (Vec<_>, Vec<_>) = self
            .layers
            .iter()
            .partition(|layer| layer.slug() == DEFAULT_SLUG);
        let mut map = ScalarMap::new();
        for layer in others.into_iter().chain(own) {
            for parameter in layer.parameters() {
                map.insert(parameter.name.clone(), parameter.value.clone());
            }
        }
        map
    }

    /// Deserializes a layer's values into a record whose fields are named after the parameters.
    pub fn initialize_struct<T: DeserializeOwned>(&self, slug: &str) -> Result<T> {
        let values = match self.get(slug) {
            Some(layer) => {
                for def in layer.layer.definitions.iter().filter(|def| def.required) {
                    if matches!(layer.value(&def.name), None | Some(ScalarValue::Null)) {
                        return Err(SqlCommandError::MissingRequired {
                            name: def.name.clone(),
                        })
                        .with_context(|| format!("initializing layer '{slug}'"));
                    }
                }
                layer.to_map()
            }
            None => ScalarMap::new(),
        };
        serde_json::from_value(ScalarValue::Object(values)).map_err(|e| {
            anyhow::Error::from(SqlCommandError::TypeMismatch {
                name: slug.to_string(),
                expected: std::any::type_name::<T>().to_string(),
                got: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct Helpers {
        #[serde(rename = "print-query")]
        print_query: bool,
        explain: bool,
    }

    #[test]
    fn later_layers_win_when_flattened() {
        let mut parsed = ParsedLayers::new();
        parsed
            .set_value("default", "table", "test", sources::COBRA)
            .set_value("glazed", "output", "table", sources::DEFAULTS)
            .set_value("dbt", "output", "json", sources::COBRA);
        let map = parsed.get_data_map();
        assert_eq!(map["output"], json!("json"));
        assert_eq!(map["table"], json!("test"));
    }

    #[test]
    fn command_flags_shadow_builtin_parameters() {
        let mut parsed = ParsedLayers::new();
        parsed
            .set_value(DEFAULT_SLUG, "user", "alice", sources::COBRA)
            .set_value(DEFAULT_SLUG, "output", "csv", sources::DEFAULTS)
            .set_value(SQL_CONNECTION_SLUG, "user", "root", sources::DEFAULTS)
            .set_value(GLAZED_SLUG, "output", "json", sources::COBRA);
        let map = parsed.get_data_map();
        assert_eq!(map["user"], json!("alice"));
        assert_eq!(map["output"], json!("csv"));
        assert_eq!(map.keys().collect::<Vec<_>>(), ["user", "output"]);
    }

    #[test]
    fn writes_are_logged_with_their_source() {
        let mut parsed = ParsedLayers::new();
        parsed
            .set_value("default", "limit", 10, sources::DEFAULTS)
            .set_value("default", "limit", 20, sources::CONFIG);
        let parameter = parsed.get("default").unwrap().get("limit").unwrap();
        assert_eq!(parameter.value, json!(20));
        assert_eq!(parameter.source(), Some(sources::CONFIG));
        assert_eq!(parameter.log.len(), 2);
        assert_eq!(parameter.log[0].value, json!(10));
    }

    #[test]
    fn initialize_struct_reads_named_fields() {
        let mut parsed = ParsedLayers::new();
        parsed.set_value(SQL_HELPERS_SLUG, "print-query", true, sources::COBRA);
        let helpers: Helpers = parsed.initialize_struct(SQL_HELPERS_SLUG).unwrap();
        assert!(helpers.print_query);
        assert!(!helpers.explain);

        let missing: Helpers = parsed.initialize_struct("absent").unwrap();
        assert!(!missing.print_query);
    }

    #[test]
    fn initialize_struct_reports_missing_and_mistyped() {
        let layer = ParameterLayer::new("conn", "Connection")
            .definition(ParameterDefinition::new("host", ParameterType::String).required());
        let mut parsed = ParsedLayers::from_layers(&{
            let mut layers = ParameterLayers::new();
            layers.push(layer).unwrap();
            layers
        });
        let err = parsed.initialize_struct::<Helpers>("conn").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::MissingRequired));

        parsed.set_value("conn", "host", "db", sources::COBRA);
        parsed.set_value(SQL_HELPERS_SLUG, "explain", "loud", sources::COBRA);
        let err = parsed.initialize_struct::<Helpers>(SQL_HELPERS_SLUG).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::TypeMismatch));
    }
}
