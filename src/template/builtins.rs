use super::Functions;
use crate::imports::*;

/*
    The function table every template gets, with or without a database behind it.
    SQL helpers layer on top of this (see sql::render) and fall back here for anything they do not define.
*/
pub const BUILTIN_NAMES: &[&str] = &[
    "and", "or", "not", "len", "index", "eq", "ne", "lt", "le", "gt", "ge", "print", "println",
    "printf", "join", "lower", "upper", "trim", "split", "contains", "default", "toJson",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins;

#[async_trait]
impl Functions for Builtins {
    fn has(&self, name: &str) -> bool {
        BUILTIN_NAMES.contains(&name)
    }

    async fn call(&self, name: &str, args: Vec<ScalarValue>) -> Result<ScalarValue> {
        call_builtin(name, &args)
    }
}

pub fn call_builtin(name: &str, args: &[ScalarValue]) -> Result<ScalarValue> {
    match name {
        "and" => Ok(args
            .iter()
            .find(|v| !is_truthy(v))
            .or(args.last())
            .cloned()
            .unwrap_or(ScalarValue::Null)),
        "or" => Ok(args
            .iter()
            .find(|v| is_truthy(v))
            .or(args.last())
            .cloned()
            .unwrap_or(ScalarValue::Null)),
        "not" => {
            let [value] = exact::<1>(name, args)?;
            Ok(ScalarValue::Bool(!is_truthy(value)))
        }
        "len" => {
            let [value] = exact::<1>(name, args)?;
            let len = match value {
                ScalarValue::String(s) => s.chars().count(),
                ScalarValue::Array(a) => a.len(),
                ScalarValue::Object(o) => o.len(),
                other => return Err(anyhow::anyhow!("len of {}", describe_value(other))),
            };
            Ok(ScalarValue::from(len))
        }
        "index" => index(args),
        "eq" => {
            let (first, rest) = args
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("missing argument for comparison"))?;
            if rest.is_empty() {
                return Err(anyhow::anyhow!("missing argument for comparison"));
            }
            Ok(ScalarValue::Bool(rest.iter().any(|other| values_equal(first, other))))
        }
        "ne" => {
            let [a, b] = exact::<2>(name, args)?;
            Ok(ScalarValue::Bool(!values_equal(a, b)))
        }
        "lt" | "le" | "gt" | "ge" => {
            let [a, b] = exact::<2>(name, args)?;
            let ordering = compare(a, b)?;
            Ok(ScalarValue::Bool(match name {
                "lt" => ordering.is_lt(),
                "le" => ordering.is_le(),
                "gt" => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        "print" => Ok(ScalarValue::String(sprint(args))),
        "println" => {
            let parts: Vec<String> = args.iter().map(format_value).collect();
            Ok(ScalarValue::String(format!("{}\n", parts.join(" "))))
        }
        "printf" => {
            let (format, rest) = args
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("printf needs a format string"))?;
            Ok(ScalarValue::String(sprintf(format.as_str_or_err("format")?, rest)))
        }
        "join" => {
            let [a, b] = exact::<2>(name, args)?;
            // Accept both argument orders: `join .list ","` and `.list | join ","`.
            let (list, sep) = match (a, b) {
                (ScalarValue::Array(list), sep) | (sep, ScalarValue::Array(list)) => (list, sep),
                _ => return Err(anyhow::anyhow!("join needs a list and a separator")),
            };
            let sep = sep.as_str_or_err("separator")?;
            let parts: Vec<String> = list.iter().map(format_value).collect();
            Ok(ScalarValue::String(parts.join(sep)))
        }
        "lower" => {
            let [value] = exact::<1>(name, args)?;
            Ok(ScalarValue::String(format_value(value).to_lowercase()))
        }
        "upper" => {
            let [value] = exact::<1>(name, args)?;
            Ok(ScalarValue::String(format_value(value).to_uppercase()))
        }
        "trim" => {
            let [value] = exact::<1>(name, args)?;
            Ok(ScalarValue::String(format_value(value).trim().to_string()))
        }
        "split" => {
            let [sep, value] = exact::<2>(name, args)?;
            let sep = sep.as_str_or_err("separator")?;
            let text = format_value(value);
            Ok(ScalarValue::Array(
                text.split(sep).map(|s| ScalarValue::String(s.to_string())).collect(),
            ))
        }
        "contains" => {
            let [needle, haystack] = exact::<2>(name, args)?;
            Ok(ScalarValue::Bool(match haystack {
                ScalarValue::Array(items) => items.iter().any(|item| values_equal(item, needle)),
                other => format_value(other).contains(&format_value(needle)),
            }))
        }
        "default" => {
            let [fallback, value] = exact::<2>(name, args)?;
            Ok(if is_truthy(value) { value.clone() } else { fallback.clone() })
        }
        "toJson" => {
            let [value] = exact::<1>(name, args)?;
            Ok(ScalarValue::String(serde_json::to_string(value)?))
        }
        other => Err(anyhow::anyhow!("function \"{}\" not defined", other)),
    }
}

fn exact<'a, const N: usize>(name: &str, args: &'a [ScalarValue]) -> Result<&'a [ScalarValue; N]> {
    args.try_into().map_err(|_| {
        anyhow::anyhow!("wrong number of args for {}: want {} got {}", name, N, args.len())
    })
}

fn index(args: &[ScalarValue]) -> Result<ScalarValue> {
    let (target, keys) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("index of nothing"))?;
    let mut current = target.clone();
    for key in keys {
        current = match (&current, key) {
            (ScalarValue::Array(items), key) => {
                let i = as_integer(key)
                    .ok_or_else(|| anyhow::anyhow!("cannot index list with {}", describe_value(key)))?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("index out of range: {}", i))?
            }
            (ScalarValue::Object(map), ScalarValue::String(k)) => {
                map.get(k).cloned().unwrap_or(ScalarValue::Null)
            }
            (ScalarValue::Null, _) => return Err(anyhow::anyhow!("index of untyped nil")),
            (other, key) => {
                return Err(anyhow::anyhow!(
                    "can't index item of type {} with {}",
                    describe_value(other),
                    describe_value(key)
                ));
            }
        };
    }
    Ok(current)
}

fn values_equal(a: &ScalarValue, b: &ScalarValue) -> bool {
    match (a, b) {
        (ScalarValue::Number(x), ScalarValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &ScalarValue, b: &ScalarValue) -> Result<std::cmp::Ordering> {
    match (a, b) {
        (ScalarValue::Number(x), ScalarValue::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or_else(|| anyhow::anyhow!("incomparable numbers")),
        (ScalarValue::String(x), ScalarValue::String(y)) => Ok(x.cmp(y)),
        _ => Err(anyhow::anyhow!(
            "incompatible types for comparison: {} and {}",
            describe_value(a),
            describe_value(b)
        )),
    }
}

// Spaces go between operands only when neither side is a string.
fn sprint(args: &[ScalarValue]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    out
}

fn sprintf(format: &str, args: &[ScalarValue]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        match verb {
            'd' => match as_integer(arg) {
                Some(i) => out.push_str(&i.to_string()),
                None => out.push_str(&format!("%!d({})", format_value(arg))),
            },
            'f' => match arg.as_f64() {
                Some(f) => out.push_str(&format!("{:.*}", precision.unwrap_or(6), f)),
                None => out.push_str(&format!("%!f({})", format_value(arg))),
            },
            'q' => out.push_str(&serde_json::to_string(&format_value(arg)).unwrap_or_default()),
            't' => match arg {
                ScalarValue::Bool(b) => out.push_str(&b.to_string()),
                other => out.push_str(&format!("%!t({})", format_value(other))),
            },
            _ => out.push_str(&format_value(arg)),
        }
    }
    out
}
