use crate::imports::*;
use chrono::{DateTime, FixedOffset};

/*
    Quoting helpers available to every query template. None of these touch the database;
    the helpers that do live in sql::render.

    Quotes are escaped by doubling, which every supported backend accepts inside a '...' literal.
*/
pub const SQL_HELPER_NAMES: &[&str] = &[
    "sqlEscape",
    "sqlString",
    "sqlStringLike",
    "sqlLike",
    "sqlStringIn",
    "sqlIntIn",
    "sqlIn",
    "sqlDate",
    "sqlDateTime",
];

pub fn call_sql_helper(name: &str, args: &[ScalarValue]) -> Result<ScalarValue> {
    let value = match args {
        [value] => value,
        _ => {
            return Err(anyhow::anyhow!(
                "wrong number of args for {}: want 1 got {}",
                name,
                args.len()
            ));
        }
    };
    let text = match name {
        "sqlEscape" => sql_escape(&format_value(value)),
        "sqlString" | "sqlStringLike" => sql_string(&format_value(value)),
        "sqlLike" => format!("'%{}%'", sql_escape(&format_value(value))),
        "sqlStringIn" => as_list(value)
            .iter()
            .map(|v| sql_string(&format_value(v)))
            .collect::<Vec<_>>()
            .join(","),
        "sqlIntIn" => as_list(value)
            .iter()
            .map(integer_literal)
            .collect::<Result<Vec<_>>>()?
            .join(","),
        "sqlIn" => as_list(value)
            .iter()
            .map(|v| match v {
                ScalarValue::String(s) => sql_string(s),
                other => format_value(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        "sqlDate" => format!("'{}'", to_datetime(value)?.format("%Y-%m-%d")),
        "sqlDateTime" => format!("'{}'", to_datetime(value)?.format("%Y-%m-%d %H:%M:%S")),
        other => return Err(anyhow::anyhow!("function \"{}\" not defined", other)),
    };
    Ok(ScalarValue::String(text))
}

pub fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn sql_string(value: &str) -> String {
    format!("'{}'", sql_escape(value))
}

// A lone scalar is treated as a one-element list.
fn as_list(value: &ScalarValue) -> Vec<ScalarValue> {
    match value {
        ScalarValue::Array(items) => items.clone(),
        ScalarValue::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn integer_literal(value: &ScalarValue) -> Result<String> {
    let parsed = match value {
        ScalarValue::String(s) => s.trim().parse::<i64>().ok(),
        other => as_integer(other),
    };
    parsed
        .map(|i| i.to_string())
        .ok_or_else(|| anyhow::anyhow!("sqlIntIn: '{}' is not an integer", format_value(value)))
}

fn to_datetime(value: &ScalarValue) -> Result<DateTime<FixedOffset>> {
    let text = value.as_str_or_err("date")?;
    dates::parse_absolute(text).ok_or_else(|| anyhow::anyhow!("'{}' is not a date", text))
}
