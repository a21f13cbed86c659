use crate::imports::*;
use std::path::Path;

/*
    Coercion of raw values (CLI text, YAML scalars, config entries) into the typed value a
    ParameterDefinition declares.

    Functions:
    * coerce - Raw value to typed value, or a typed failure naming the parameter
    * check_default_validity - A definition's default must coerce cleanly
    * load_file - Reads a file parameter into its record form
*/
pub async fn check_default_validity(
    ctx: &ExecutionContext,
    def: &ParameterDefinition,
) -> Result<()> {
    let Some(default) = &def.default else {
        return Ok(());
    };
    match coerce(ctx, def, default).await {
        Ok(_) => Ok(()),
        Err(err) if is_cancelled(&err) => Err(err),
        Err(err) => {
            tracing::debug!(parameter = %def.name, error = %err, "Default does not satisfy its type");
            Err(SqlCommandError::InvalidDefault {
                name: def.name.clone(),
                reason: format!("{err:#}"),
            }
            .into())
        }
    }
}

pub async fn coerce(
    ctx: &ExecutionContext,
    def: &ParameterDefinition,
    raw: &ScalarValue,
) -> Result<ScalarValue> {
    let name = def.name.as_str();
    match def.ty {
        ParameterType::String => coerce_string(name, raw),
        ParameterType::Int => coerce_int(name, raw),
        ParameterType::Float => coerce_float(name, raw),
        ParameterType::Bool => coerce_bool(name, raw),
        ParameterType::Date => coerce_date(ctx, name, raw),
        ParameterType::Choice => coerce_choice(def, raw),
        ParameterType::StringList => each(name, raw, |item| coerce_string(name, item)),
        ParameterType::IntList => each(name, raw, |item| coerce_int(name, item)),
        ParameterType::FloatList => each(name, raw, |item| coerce_float(name, item)),
        ParameterType::ChoiceList => each(name, raw, |item| coerce_choice(def, item)),
        ParameterType::KeyValue => coerce_key_value(name, raw),
        ParameterType::File => {
            let path = path_of(name, raw)?;
            Ok(load_file(ctx, &path).await?.into_value())
        }
        ParameterType::FileList => {
            let mut files = Vec::new();
            for path in paths_of(name, raw)? {
                files.push(load_file(ctx, &path).await?.into_value());
            }
            Ok(ScalarValue::Array(files))
        }
        ParameterType::StringFromFile => {
            let path = path_of(name, raw)?;
            Ok(ScalarValue::String(load_file(ctx, &path).await?.content))
        }
        ParameterType::StringFromFiles => {
            let mut content = String::new();
            for path in paths_of(name, raw)? {
                content.push_str(&load_file(ctx, &path).await?.content);
            }
            Ok(ScalarValue::String(content))
        }
        ParameterType::ObjectFromFile => {
            let path = path_of(name, raw)?;
            load_file(ctx, &path).await?.document(name)
        }
        ParameterType::ObjectListFromFile => {
            let path = path_of(name, raw)?;
            Ok(ScalarValue::Array(as_list(
                load_file(ctx, &path).await?.document(name)?,
            )))
        }
        ParameterType::ObjectListFromFiles => {
            let mut objects = Vec::new();
            for path in paths_of(name, raw)? {
                objects.extend(as_list(load_file(ctx, &path).await?.document(name)?));
            }
            Ok(ScalarValue::Array(objects))
        }
        ParameterType::StringListFromFile => {
            let path = path_of(name, raw)?;
            Ok(ScalarValue::Array(load_file(ctx, &path).await?.lines()))
        }
        ParameterType::StringListFromFiles => {
            let mut lines = Vec::new();
            for path in paths_of(name, raw)? {
                lines.extend(load_file(ctx, &path).await?.lines());
            }
            Ok(ScalarValue::Array(lines))
        }
    }
}

fn coerce_string(name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    match raw {
        ScalarValue::String(_) => Ok(raw.clone()),
        other => Err(SqlCommandError::type_mismatch(name, "string", other).into()),
    }
}

fn coerce_int(name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    match raw {
        ScalarValue::Number(_) => as_integer(raw)
            .map(ScalarValue::from)
            .ok_or_else(|| SqlCommandError::type_mismatch(name, "int", raw).into()),
        ScalarValue::String(s) => s.trim().parse::<i64>().map(ScalarValue::from).map_err(|e| {
            SqlCommandError::Parse {
                name: name.to_string(),
                reason: format!("'{s}' is not an integer: {e}"),
            }
            .into()
        }),
        other => Err(SqlCommandError::type_mismatch(name, "int", other).into()),
    }
}

fn coerce_float(name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    let value = match raw {
        ScalarValue::Number(n) => n.as_f64(),
        ScalarValue::String(s) => Some(s.trim().parse::<f64>().map_err(|e| {
            SqlCommandError::Parse {
                name: name.to_string(),
                reason: format!("'{s}' is not a number: {e}"),
            }
        })?),
        _ => None,
    };
    match value.map(number_from_f64) {
        Some(ScalarValue::Null) | None => {
            Err(SqlCommandError::type_mismatch(name, "float", raw).into())
        }
        Some(number) => Ok(number),
    }
}

fn coerce_bool(name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    match raw {
        ScalarValue::Bool(_) => Ok(raw.clone()),
        ScalarValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(ScalarValue::Bool(true)),
            "false" => Ok(ScalarValue::Bool(false)),
            _ => Err(SqlCommandError::Parse {
                name: name.to_string(),
                reason: format!("'{s}' is not a boolean"),
            }
            .into()),
        },
        other => Err(SqlCommandError::type_mismatch(name, "bool", other).into()),
    }
}

fn coerce_date(ctx: &ExecutionContext, name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    let text = match raw {
        ScalarValue::String(s) => s,
        other => return Err(SqlCommandError::type_mismatch(name, "date", other).into()),
    };
    dates::parse_date(text, ctx.reference_time())
        .map(|dt| ScalarValue::String(dt.to_rfc3339()))
        .map_err(|reason| {
            anyhow::Error::from(SqlCommandError::Parse {
                name: name.to_string(),
                reason,
            })
        })
}

fn coerce_choice(def: &ParameterDefinition, raw: &ScalarValue) -> Result<ScalarValue> {
    let value = match raw {
        ScalarValue::String(s) => s,
        other => return Err(SqlCommandError::type_mismatch(&def.name, "choice", other).into()),
    };
    if def.choices.iter().any(|choice| choice == value) {
        Ok(raw.clone())
    } else {
        Err(SqlCommandError::ChoiceNotAllowed {
            name: def.name.clone(),
            value: value.clone(),
            choices: def.choices.join(", "),
        }
        .into())
    }
}

fn coerce_key_value(name: &str, raw: &ScalarValue) -> Result<ScalarValue> {
    let mut map = ScalarMap::new();
    match raw {
        ScalarValue::Object(entries) => {
            for (key, value) in entries {
                let value = match value {
                    ScalarValue::String(_) => value.clone(),
                    ScalarValue::Number(_) | ScalarValue::Bool(_) => {
                        ScalarValue::String(format_value(value))
                    }
                    other => {
                        return Err(SqlCommandError::type_mismatch(name, "text value", other).into());
                    }
                };
                map.insert(key.clone(), value);
            }
        }
        ScalarValue::Array(_) | ScalarValue::String(_) => {
            for token in items_of(name, raw)? {
                let token = token.as_str_or_err(name)?;
                let (key, value) = token.split_once('=').ok_or_else(|| SqlCommandError::Parse {
                    name: name.to_string(),
                    reason: format!("'{token}' is not a key=value pair"),
                })?;
                map.insert(key.trim().to_string(), ScalarValue::String(value.trim().to_string()));
            }
        }
        other => return Err(SqlCommandError::type_mismatch(name, "key=value pairs", other).into()),
    }
    Ok(ScalarValue::Object(map))
}

// Lists arrive either as sequences or as a single comma separated string.
fn items_of(name: &str, raw: &ScalarValue) -> Result<Vec<ScalarValue>> {
    match raw {
        ScalarValue::Array(items) => Ok(items.clone()),
        ScalarValue::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| ScalarValue::String(item.to_string()))
            .collect()),
        other => Err(SqlCommandError::type_mismatch(name, "list", other).into()),
    }
}

fn each<F>(name: &str, raw: &ScalarValue, mut convert: F) -> Result<ScalarValue>
where
    F: FnMut(&ScalarValue) -> Result<ScalarValue>,
{
    items_of(name, raw)?
        .iter()
        .map(&mut convert)
        .collect::<Result<Vec<_>>>()
        .map(ScalarValue::Array)
}

fn path_of(name: &str, raw: &ScalarValue) -> Result<String> {
    match raw {
        ScalarValue::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        other => Err(SqlCommandError::type_mismatch(name, "file path", other).into()),
    }
}

fn paths_of(name: &str, raw: &ScalarValue) -> Result<Vec<String>> {
    items_of(name, raw)?
        .iter()
        .map(|item| path_of(name, item))
        .collect()
}

fn as_list(value: ScalarValue) -> Vec<ScalarValue> {
    match value {
        ScalarValue::Array(items) => items,
        other => vec![other],
    }
}

/*
    Types:
    * FileData - A file parameter after loading: path, contents and, for JSON/YAML, the parsed document
*/
#[derive(Debug, Clone, PartialEq)]
pub struct FileData {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub content: String,
    pub parsed_content: Option<ScalarValue>,
    pub content_type: &'static str,
    pub size: usize,
}

impl FileData {
    fn document(self, parameter: &str) -> Result<ScalarValue> {
        if let Some(parsed) = self.parsed_content {
            return Ok(parsed);
        }
        serde_yaml::from_str::<ScalarValue>(&self.content).map_err(|e| {
            SqlCommandError::Parse {
                name: parameter.to_string(),
                reason: format!("'{}' is not a JSON or YAML document: {e}", self.path),
            }
            .into()
        })
    }

    fn lines(&self) -> Vec<ScalarValue> {
        self.content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| ScalarValue::String(line.to_string()))
            .collect()
    }

    pub fn into_value(self) -> ScalarValue {
        let mut map = ScalarMap::new();
        map.insert("path".into(), self.path.into());
        map.insert("name".into(), self.name.into());
        map.insert("extension".into(), self.extension.into());
        map.insert("content".into(), self.content.into());
        map.insert(
            "parsedContent".into(),
            self.parsed_content.unwrap_or(ScalarValue::Null),
        );
        map.insert("contentType".into(), self.content_type.into());
        map.insert("size".into(), self.size.into());
        ScalarValue::Object(map)
    }
}

pub async fn load_file(ctx: &ExecutionContext, path: &str) -> Result<FileData> {
    let content = ctx
        .cancellable(async {
            tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::Error::from(SqlCommandError::FileNotReadable {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            })
        })
        .await?;

    let file = Path::new(path);
    let extension = file
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let (content_type, parsed_content) = match extension.as_str() {
        "json" => ("application/json", serde_json::from_str(&content).ok()),
        "yaml" | "yml" => ("application/yaml", serde_yaml::from_str(&content).ok()),
        "csv" => ("text/csv", None),
        _ => ("text/plain", None),
    };
    tracing::debug!(path = %path, content_type, size = content.len(), "Loaded file parameter");

    Ok(FileData {
        path: path.to_string(),
        name: file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        extension,
        size: content.len(),
        content,
        parsed_content,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    fn def(name: &str, ty: ParameterType) -> ParameterDefinition {
        ParameterDefinition::new(name, ty)
    }

    async fn kind_of(def: &ParameterDefinition, raw: ScalarValue) -> Option<ErrorKind> {
        let ctx = ExecutionContext::default();
        let err = coerce(&ctx, def, &raw).await.unwrap_err();
        error_kind(&err)
    }

    #[tokio::test]
    async fn scalars() {
        let ctx = ExecutionContext::default();
        let int = def("limit", ParameterType::Int);
        assert_eq!(coerce(&ctx, &int, &json!("42")).await.unwrap(), json!(42));
        assert_eq!(coerce(&ctx, &int, &json!(7)).await.unwrap(), json!(7));
        assert_eq!(kind_of(&int, json!("4x")).await, Some(ErrorKind::Parse));
        assert_eq!(kind_of(&int, json!(true)).await, Some(ErrorKind::TypeMismatch));
        assert_eq!(kind_of(&int, json!(1.5)).await, Some(ErrorKind::TypeMismatch));

        let float = def("ratio", ParameterType::Float);
        assert_eq!(coerce(&ctx, &float, &json!("0.25")).await.unwrap(), json!(0.25));

        let flag = def("verbose", ParameterType::Bool);
        assert_eq!(coerce(&ctx, &flag, &json!("TRUE")).await.unwrap(), json!(true));
        assert_eq!(kind_of(&flag, json!("yes")).await, Some(ErrorKind::Parse));

        let text = def("name", ParameterType::String);
        assert_eq!(kind_of(&text, json!(3)).await, Some(ErrorKind::TypeMismatch));
    }

    #[tokio::test]
    async fn lists_accept_sequences_and_comma_text() {
        let ctx = ExecutionContext::default();
        let ids = def("ids", ParameterType::IntList);
        assert_eq!(coerce(&ctx, &ids, &json!([1, "2"])).await.unwrap(), json!([1, 2]));
        assert_eq!(coerce(&ctx, &ids, &json!("3, 4,5")).await.unwrap(), json!([3, 4, 5]));
        assert_eq!(kind_of(&ids, json!([1, "x"])).await, Some(ErrorKind::Parse));
    }

    #[tokio::test]
    async fn choices_are_enforced() {
        let ctx = ExecutionContext::default();
        let output = def("output", ParameterType::Choice).choices(["table", "json"]);
        assert_eq!(coerce(&ctx, &output, &json!("json")).await.unwrap(), json!("json"));
        assert_eq!(kind_of(&output, json!("xml")).await, Some(ErrorKind::ChoiceNotAllowed));

        let many = def("outputs", ParameterType::ChoiceList).choices(["a", "b"]);
        assert_eq!(kind_of(&many, json!(["a", "c"])).await, Some(ErrorKind::ChoiceNotAllowed));
    }

    #[tokio::test]
    async fn key_values() {
        let ctx = ExecutionContext::default();
        let kv = def("labels", ParameterType::KeyValue);
        assert_eq!(
            coerce(&ctx, &kv, &json!("env=prod,team = data")).await.unwrap(),
            json!({"env": "prod", "team": "data"})
        );
        assert_eq!(
            coerce(&ctx, &kv, &json!({"port": 5432})).await.unwrap(),
            json!({"port": "5432"})
        );
        assert_eq!(kind_of(&kv, json!(["novalue"])).await, Some(ErrorKind::Parse));
    }

    #[tokio::test]
    async fn dates_become_rfc3339() {
        let ctx = ExecutionContext::default();
        let since = def("since", ParameterType::Date);
        let value = coerce(&ctx, &since, &json!("2023-04-01")).await.unwrap();
        assert!(value.as_str().unwrap().starts_with("2023-04-01T00:00:00"));
        assert_eq!(kind_of(&since, json!("someday")).await, Some(ErrorKind::Parse));
    }

    #[tokio::test]
    async fn file_types_read_from_disk() {
        let ctx = ExecutionContext::default();
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("ids.json");
        std::fs::write(&json_path, r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        let text_path = dir.path().join("names.txt");
        let mut file = std::fs::File::create(&text_path).unwrap();
        writeln!(file, "alice\n\n  bob  ").unwrap();

        let json_path = json_path.to_string_lossy().to_string();
        let text_path = text_path.to_string_lossy().to_string();

        let file_def = def("input", ParameterType::File);
        let record = coerce(&ctx, &file_def, &json!(json_path)).await.unwrap();
        assert_eq!(record["name"], json!("ids.json"));
        assert_eq!(record["extension"], json!("json"));
        assert_eq!(record["contentType"], json!("application/json"));
        assert_eq!(record["parsedContent"][1]["id"], json!(2));

        let objects = def("rows", ParameterType::ObjectListFromFile);
        assert_eq!(
            coerce(&ctx, &objects, &json!(json_path)).await.unwrap(),
            json!([{"id": 1}, {"id": 2}])
        );

        let lines = def("names", ParameterType::StringListFromFile);
        assert_eq!(
            coerce(&ctx, &lines, &json!(text_path)).await.unwrap(),
            json!(["alice", "bob"])
        );

        let joined = def("both", ParameterType::StringFromFiles);
        let content = coerce(&ctx, &joined, &json!([text_path.clone(), text_path]))
            .await
            .unwrap();
        assert_eq!(content.as_str().unwrap().matches("alice").count(), 2);

        let missing = def("input", ParameterType::StringFromFile);
        assert_eq!(
            kind_of(&missing, json!("/definitely/not/here.sql")).await,
            Some(ErrorKind::FileNotReadable)
        );
    }

    #[tokio::test]
    async fn default_validity_matches_coercion() {
        let ctx = ExecutionContext::default();
        let cases = vec![
            (def("a", ParameterType::Int).default_value(3), true),
            (def("b", ParameterType::Int).default_value("three"), false),
            (def("c", ParameterType::Choice).choices(["x"]).default_value("y"), false),
            (def("d", ParameterType::StringList).default_value(json!(["a", "b"])), true),
            (def("e", ParameterType::Date).default_value("yesterday"), true),
            (def("f", ParameterType::Bool).default_value(json!([true])), false),
        ];
        for (def, valid) in cases {
            let coerced = coerce(&ctx, &def, def.default.as_ref().unwrap()).await;
            let checked = check_default_validity(&ctx, &def).await;
            assert_eq!(coerced.is_ok(), valid, "{}", def.name);
            assert_eq!(checked.is_ok(), valid, "{}", def.name);
            if let Err(err) = checked {
                assert_eq!(error_kind(&err), Some(ErrorKind::InvalidDefault));
            }
        }
    }
}
