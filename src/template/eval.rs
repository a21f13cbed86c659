use super::Functions;
use super::parser::{Command, Node, Operand, Pipeline, Term};
use crate::imports::*;
use futures::future::BoxFuture;

/*
    Tree-walking evaluator. Every recursive step returns a boxed future so helpers may await
    (database helpers render and run sub-queries while the outer template is mid-flight).

    Variables live on a stack; a block truncates it back to where it started when it ends.
    `$` is always the first entry and holds the data the template was executed with.
*/
pub(super) struct Evaluator<'a> {
    functions: &'a dyn Functions,
    root: &'a ScalarValue,
}

struct Scope {
    out: String,
    vars: Vec<(String, ScalarValue)>,
}

impl<'a> Evaluator<'a> {
    pub fn new(functions: &'a dyn Functions, root: &'a ScalarValue) -> Self {
        Self { functions, root }
    }

    pub async fn run(&self, nodes: &[Node]) -> Result<String> {
        let mut scope = Scope {
            out: String::new(),
            vars: vec![("$".to_string(), self.root.clone())],
        };
        self.walk(&mut scope, nodes, self.root).await?;
        Ok(scope.out)
    }

    fn walk<'b>(
        &'b self,
        scope: &'b mut Scope,
        nodes: &'b [Node],
        dot: &'b ScalarValue,
    ) -> BoxFuture<'b, Result<()>> {
        Box::pin(async move {
            for node in nodes {
                match node {
                    Node::Text(text) => scope.out.push_str(text),
                    Node::Output(pipeline) => {
                        let value = self.pipeline(scope, pipeline, dot).await?;
                        if pipeline.decl.is_empty() {
                            scope.out.push_str(&format_value(&value));
                        }
                    }
                    Node::If {
                        branches,
                        otherwise,
                    } => {
                        let mark = scope.vars.len();
                        let mut taken = false;
                        for (condition, body) in branches {
                            let value = self.pipeline(scope, condition, dot).await?;
                            if is_truthy(&value) {
                                self.walk(scope, body, dot).await?;
                                taken = true;
                                break;
                            }
                        }
                        if !taken {
                            self.walk(scope, otherwise, dot).await?;
                        }
                        scope.vars.truncate(mark);
                    }
                    Node::With {
                        pipeline,
                        body,
                        otherwise,
                    } => {
                        let mark = scope.vars.len();
                        let value = self.pipeline(scope, pipeline, dot).await?;
                        if is_truthy(&value) {
                            self.walk(scope, body, &value).await?;
                        } else {
                            self.walk(scope, otherwise, dot).await?;
                        }
                        scope.vars.truncate(mark);
                    }
                    Node::Range {
                        pipeline,
                        body,
                        otherwise,
                    } => {
                        let value = self.commands(scope, pipeline, dot).await?;
                        let entries = range_entries(&value)?;
                        if entries.is_empty() {
                            self.walk(scope, otherwise, dot).await?;
                            continue;
                        }
                        for (key, element) in entries {
                            let mark = scope.vars.len();
                            match pipeline.decl.as_slice() {
                                [] => {}
                                [only] => scope.vars.push((only.clone(), element.clone())),
                                [k, v] => {
                                    scope.vars.push((k.clone(), key));
                                    scope.vars.push((v.clone(), element.clone()));
                                }
                                _ => return Err(anyhow::anyhow!("range declares too many variables")),
                            }
                            self.walk(scope, body, &element).await?;
                            scope.vars.truncate(mark);
                        }
                    }
                }
            }
            Ok(())
        })
    }

    // Evaluates the commands and then binds the declared variable, if any.
    fn pipeline<'b>(
        &'b self,
        scope: &'b mut Scope,
        pipeline: &'b Pipeline,
        dot: &'b ScalarValue,
    ) -> BoxFuture<'b, Result<ScalarValue>> {
        Box::pin(async move {
            let value = self.commands(scope, pipeline, dot).await?;
            match pipeline.decl.as_slice() {
                [] => {}
                [name] if pipeline.assign => {
                    let slot = scope
                        .vars
                        .iter_mut()
                        .rev()
                        .find(|(var, _)| var == name)
                        .ok_or_else(|| anyhow::anyhow!("undefined variable: {}", name))?;
                    slot.1 = value.clone();
                }
                [name] => scope.vars.push((name.clone(), value.clone())),
                _ => return Err(anyhow::anyhow!("too many declarations in pipeline")),
            }
            Ok(value)
        })
    }

    fn commands<'b>(
        &'b self,
        scope: &'b mut Scope,
        pipeline: &'b Pipeline,
        dot: &'b ScalarValue,
    ) -> BoxFuture<'b, Result<ScalarValue>> {
        Box::pin(async move {
            let mut previous = None;
            for command in &pipeline.commands {
                previous = Some(self.command(scope, command, dot, previous.take()).await?);
            }
            previous.ok_or_else(|| anyhow::anyhow!("empty pipeline"))
        })
    }

    fn command<'b>(
        &'b self,
        scope: &'b mut Scope,
        command: &'b Command,
        dot: &'b ScalarValue,
        piped: Option<ScalarValue>,
    ) -> BoxFuture<'b, Result<ScalarValue>> {
        Box::pin(async move {
            let (first, rest) = command
                .operands
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("empty command"))?;

            let name = match &first.term {
                Term::Function(name) if first.fields.is_empty() => name,
                _ => {
                    if !rest.is_empty() || piped.is_some() {
                        return Err(anyhow::anyhow!("can't give argument to non-function"));
                    }
                    return self.operand(scope, first, dot).await;
                }
            };

            if name == "and" || name == "or" {
                return self.short_circuit(scope, name, rest, dot, piped).await;
            }
            if !self.functions.has(name) {
                return Err(anyhow::anyhow!("function \"{}\" not defined", name));
            }
            let mut args = Vec::with_capacity(rest.len() + 1);
            for operand in rest {
                args.push(self.operand(scope, operand, dot).await?);
            }
            args.extend(piped);
            self.functions
                .call(name, args)
                .await
                .with_context(|| format!("error calling {name}"))
        })
    }

    // `and` stops at the first falsy argument, `or` at the first truthy one.
    async fn short_circuit(
        &self,
        scope: &mut Scope,
        name: &str,
        operands: &[Operand],
        dot: &ScalarValue,
        piped: Option<ScalarValue>,
    ) -> Result<ScalarValue> {
        if operands.is_empty() && piped.is_none() {
            return Err(anyhow::anyhow!("wrong number of args for {}: want at least 1 got 0", name));
        }
        let stop_when = name == "or";
        let mut last = ScalarValue::Null;
        for operand in operands {
            last = self.operand(scope, operand, dot).await?;
            if is_truthy(&last) == stop_when {
                return Ok(last);
            }
        }
        if let Some(value) = piped {
            last = value;
        }
        Ok(last)
    }

    fn operand<'b>(
        &'b self,
        scope: &'b mut Scope,
        operand: &'b Operand,
        dot: &'b ScalarValue,
    ) -> BoxFuture<'b, Result<ScalarValue>> {
        Box::pin(async move {
            let base = match &operand.term {
                Term::Dot => dot.clone(),
                Term::Field(path) => field_path(dot, path)?,
                Term::Literal(value) => value.clone(),
                Term::Variable(name) => scope
                    .vars
                    .iter()
                    .rev()
                    .find(|(var, _)| var == name)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| anyhow::anyhow!("undefined variable: {}", name))?,
                Term::Pipeline(pipeline) => self.pipeline(scope, pipeline, dot).await?,
                Term::Function(name) => {
                    if !self.functions.has(name) {
                        return Err(anyhow::anyhow!("function \"{}\" not defined", name));
                    }
                    self.functions
                        .call(name, Vec::new())
                        .await
                        .with_context(|| format!("error calling {name}"))?
                }
            };
            field_path(&base, &operand.fields)
        })
    }
}

fn field_path(value: &ScalarValue, path: &[String]) -> Result<ScalarValue> {
    let mut current = value;
    for field in path {
        current = match current {
            ScalarValue::Object(map) => match map.get(field) {
                Some(next) => next,
                None => return Ok(ScalarValue::Null),
            },
            ScalarValue::Null => return Ok(ScalarValue::Null),
            other => {
                return Err(anyhow::anyhow!(
                    "can't evaluate field {} in type {}",
                    field,
                    describe_value(other)
                ));
            }
        };
    }
    Ok(current.clone())
}

// (key, element) pairs: list index, sorted map key, or counter for a non-negative integer.
fn range_entries(value: &ScalarValue) -> Result<Vec<(ScalarValue, ScalarValue)>> {
    Ok(match value {
        ScalarValue::Null => Vec::new(),
        ScalarValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (ScalarValue::from(i), item.clone()))
            .collect(),
        ScalarValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.into_iter()
                .map(|k| (ScalarValue::String(k.clone()), map[k].clone()))
                .collect()
        }
        ScalarValue::Number(_) => match as_integer(value) {
            Some(n) if n >= 0 => (0..n)
                .map(|i| (ScalarValue::from(i), ScalarValue::from(i)))
                .collect(),
            _ => return Err(anyhow::anyhow!("range can't iterate over {}", format_value(value))),
        },
        other => return Err(anyhow::anyhow!("range can't iterate over {}", format_value(other))),
    })
}

#[cfg(test)]
mod tests {
    use super::super::{Template, builtins::Builtins, render};
    use super::*;
    use serde_json::json;

    async fn run(source: &str, data: ScalarValue) -> String {
        render(source, &data).await.unwrap()
    }

    #[tokio::test]
    async fn fields_and_variables() {
        let data = json!({"table": "test", "user": {"name": "ada"}});
        assert_eq!(run("SELECT * FROM {{.table}}", data.clone()).await, "SELECT * FROM test");
        assert_eq!(run("{{ .user.name }}/{{ .missing }}/{{ .missing.deeper }}", data.clone()).await, "ada//");
        assert_eq!(run("{{ $t := .table }}{{ $t }}{{ $.user.name }}", data.clone()).await, "testada");
        assert_eq!(run("{{ $t := 1 }}{{ $t = 2 }}{{ $t }}", data).await, "2");
    }

    #[tokio::test]
    async fn conditionals() {
        let source = "{{ if .a }}A{{ else if .b }}B{{ else }}C{{ end }}";
        assert_eq!(run(source, json!({"a": 1})).await, "A");
        assert_eq!(run(source, json!({"b": "x"})).await, "B");
        assert_eq!(run(source, json!({"a": 0, "b": ""})).await, "C");
        assert_eq!(run("{{ with .u }}{{ .name }}{{ else }}none{{ end }}", json!({"u": {"name": "n"}})).await, "n");
        assert_eq!(run("{{ with .u }}{{ .name }}{{ else }}none{{ end }}", json!({})).await, "none");
    }

    #[tokio::test]
    async fn ranges() {
        let data = json!({"ids": [3, 4], "m": {"b": 2, "a": 1}});
        assert_eq!(run("{{ range .ids }}{{ . }},{{ end }}", data.clone()).await, "3,4,");
        assert_eq!(run("{{ range $i, $v := .ids }}{{ $i }}={{ $v }} {{ end }}", data.clone()).await, "0=3 1=4 ");
        assert_eq!(run("{{ range $k, $v := .m }}{{ $k }}{{ $v }}{{ end }}", data.clone()).await, "a1b2");
        assert_eq!(run("{{ range .none }}x{{ else }}empty{{ end }}", data.clone()).await, "empty");
        assert_eq!(run("{{ range 3 }}{{ . }}{{ end }}", data).await, "012");
    }

    #[tokio::test]
    async fn pipelines_append_the_previous_value() {
        let data = json!({"names": ["a", "b"]});
        assert_eq!(run("{{ .names | join \",\" }}", data.clone()).await, "a,b");
        assert_eq!(run("{{ \"x\" | printf \"%s-%s\" \"y\" }}", data.clone()).await, "y-x");
        assert_eq!(run("{{ len (index . \"names\") }}", data).await, "2");
    }

    #[tokio::test]
    async fn and_or_short_circuit() {
        // `index` on a missing list would fail if it were evaluated.
        assert_eq!(run("{{ or .a (index .none 1) }}", json!({"a": "hit"})).await, "hit");
        assert_eq!(run("{{ and .a (index .none 1) }}", json!({"a": 0})).await, "0");
        assert_eq!(run("{{ and 1 2 }}", json!({})).await, "2");
    }

    #[tokio::test]
    async fn evaluation_errors() {
        let data = json!({"s": "text"});
        for source in [
            "{{ nosuch 1 }}",
            "{{ $undefined }}",
            "{{ .s.field }}",
            "{{ .s 1 }}",
            "{{ range .s }}{{ end }}",
        ] {
            let template = Template::parse("t", source).unwrap();
            assert!(template.execute(&data, &Builtins).await.is_err(), "{source}");
        }
    }

    #[tokio::test]
    async fn block_variables_do_not_leak() {
        let template = Template::parse("t", "{{ if 1 }}{{ $x := 1 }}{{ end }}{{ $x }}").unwrap();
        let err = template.execute(&json!({}), &Builtins).await.unwrap_err();
        assert!(format!("{err:#}").contains("undefined variable"));
    }
}
