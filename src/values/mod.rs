use crate::imports::*;

pub mod context;
pub mod dates;
pub mod row;

/*
    Types:
    * ScalarValue - Any parameter, template or cell value. Alias of serde_json::Value
    * ScalarMap - Ordered string-keyed map of ScalarValues (insertion order is kept)
    * LayerValues - Raw values per layer slug, the shape callers hand to the middleware chain
*/
pub type ScalarValue = serde_json::Value;
pub type ScalarMap = serde_json::Map<String, ScalarValue>;
pub type LayerValues = BTreeMap<String, ScalarMap>;

/// Builds a [`ScalarMap`] from `key => value` pairs.
#[macro_export]
macro_rules! params {
    () => { $crate::prelude::ScalarMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::prelude::ScalarMap::new();
        $( map.insert(::std::string::String::from($key), $crate::prelude::ScalarValue::from($value)); )+
        map
    }};
}

/*
    Helper functions:
    * describe_value - Short type label used in error messages
    * is_truthy - Template truthiness: false, 0, null and empty values are false
    * format_value - Renders a value the way template output prints it
    * number_from_f64 - f64 to ScalarValue, falling back to null for NaN/inf
*/
pub fn describe_value(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => "null".to_string(),
        ScalarValue::Bool(_) => "bool".to_string(),
        ScalarValue::Number(n) if n.is_f64() => "float".to_string(),
        ScalarValue::Number(_) => "int".to_string(),
        ScalarValue::String(_) => "string".to_string(),
        ScalarValue::Array(_) => "list".to_string(),
        ScalarValue::Object(_) => "object".to_string(),
    }
}

pub fn is_truthy(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Null => false,
        ScalarValue::Bool(b) => *b,
        ScalarValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        ScalarValue::String(s) => !s.is_empty(),
        ScalarValue::Array(a) => !a.is_empty(),
        ScalarValue::Object(o) => !o.is_empty(),
    }
}

pub fn format_value(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Null => String::new(),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Number(n) => format_number(n),
        ScalarValue::String(s) => s.clone(),
        ScalarValue::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(" "))
        }
        ScalarValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, format_value(&map[k])))
                .collect();
            format!("map[{}]", inner.join(" "))
        }
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

pub fn number_from_f64(f: f64) -> ScalarValue {
    serde_json::Number::from_f64(f)
        .map(ScalarValue::Number)
        .unwrap_or(ScalarValue::Null)
}

/// Integer view of a value, accepting floats without a fractional part.
pub fn as_integer(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

/*
    Extension Traits:
    * ScalarAsExt - Typed accessors on ScalarValue that name the offending field in the error
*/
pub trait ScalarAsExt {
    fn as_str_or_err(&self, field: &str) -> Result<&str>;
    fn as_i64_or_err(&self, field: &str) -> Result<i64>;
    fn as_array_or_err(&self, field: &str) -> Result<&Vec<ScalarValue>>;
}

impl ScalarAsExt for ScalarValue {
    fn as_str_or_err(&self, field: &str) -> Result<&str> {
        self.as_str()
            .context(format!("'{}' must be a string, got {}", field, describe_value(self)))
    }

    fn as_i64_or_err(&self, field: &str) -> Result<i64> {
        as_integer(self)
            .context(format!("'{}' must be an integer, got {}", field, describe_value(self)))
    }

    fn as_array_or_err(&self, field: &str) -> Result<&Vec<ScalarValue>> {
        self.as_array()
            .context(format!("'{}' must be a list, got {}", field, describe_value(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_template_rules() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("false")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!(0.5)));
    }

    #[test]
    fn values_print_like_template_output() {
        assert_eq!(format_value(&json!(null)), "");
        assert_eq!(format_value(&json!(3.0)), "3");
        assert_eq!(format_value(&json!(2.5)), "2.5");
        assert_eq!(format_value(&json!([1, "a", true])), "[1 a true]");
        assert_eq!(format_value(&json!({"b": 2, "a": 1})), "map[a:1 b:2]");
    }

    #[test]
    fn params_macro_keeps_insertion_order() {
        let map = crate::params! { "table" => "test", "limit" => 10 };
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, ["table", "limit"]);
        assert_eq!(map["limit"], json!(10));
    }

    #[test]
    fn accessor_errors_name_the_field() {
        let err = json!("abc").as_i64_or_err("limit").unwrap_err();
        assert!(err.to_string().contains("'limit' must be an integer"));
        assert_eq!(json!(4.0).as_i64_or_err("limit").unwrap(), 4);
    }
}
