use crate::imports::*;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "template/template.pest"] // relative to src directory
struct TemplateParser;

/*
    Types:
    * Node - One element of the parsed tree: text, an output action or a control block
    * Pipeline - Optional variable declaration plus commands joined by '|'
    * Command - A function call or a single operand
    * Operand - A term followed by an optional field chain
    * Term - Dot, field, variable, literal, function name or parenthesised pipeline
*/
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Pipeline {
    pub decl: Vec<String>,
    pub assign: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operand {
    pub term: Term,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    Dot,
    Field(Vec<String>),
    Variable(String),
    Function(String),
    Literal(ScalarValue),
    Pipeline(Box<Pipeline>),
}

enum Statement {
    Output(Pipeline),
    If(Pipeline),
    ElseIf(Pipeline),
    Else,
    End,
    Range(Pipeline),
    With(Pipeline),
}

enum Item {
    Text(String),
    Tag {
        trim_left: bool,
        trim_right: bool,
        statement: Option<Statement>,
    },
}

enum Stop {
    Eof,
    End,
    Else,
    ElseIf(Pipeline),
}

pub(crate) fn parse(source: &str) -> Result<Vec<Node>> {
    let mut pairs = TemplateParser::parse(Rule::template, source)
        .map_err(|e| anyhow::anyhow!("template syntax error: {}", e))?;
    let root = pairs.next().context("template produced no parse tree")?;

    let mut items = Vec::new();
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::text => items.push(Item::Text(pair.as_str().to_string())),
            Rule::comment | Rule::action => items.push(parse_tag(pair)?),
            Rule::EOI => {}
            other => return Err(anyhow::anyhow!("unexpected {:?} at template top level", other)),
        }
    }
    apply_trim_markers(&mut items);

    let mut iter = items.into_iter();
    let (nodes, stop) = build_block(&mut iter)?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End => Err(anyhow::anyhow!("unexpected {{{{end}}}}")),
        Stop::Else | Stop::ElseIf(_) => Err(anyhow::anyhow!("unexpected {{{{else}}}}")),
    }
}

fn parse_tag(pair: Pair<'_, Rule>) -> Result<Item> {
    let mut trim_left = false;
    let mut trim_right = false;
    let mut statement = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::open_delim => trim_left = inner.into_inner().next().is_some(),
            Rule::close_delim => trim_right = inner.into_inner().next().is_some(),
            Rule::statement => statement = Some(parse_statement(inner)?),
            _ => {}
        }
    }
    Ok(Item::Tag {
        trim_left,
        trim_right,
        statement,
    })
}

fn parse_statement(pair: Pair<'_, Rule>) -> Result<Statement> {
    let inner = pair
        .into_inner()
        .next()
        .context("empty template action")?;
    let rule = inner.as_rule();
    if rule == Rule::pipeline {
        return Ok(Statement::Output(parse_pipeline(inner)?));
    }
    let pipeline = inner
        .into_inner()
        .find(|p| p.as_rule() == Rule::pipeline)
        .map(parse_pipeline)
        .transpose()?;
    let required = |p: Option<Pipeline>| p.context("control action is missing its pipeline");
    Ok(match rule {
        Rule::if_stmt => Statement::If(required(pipeline)?),
        Rule::else_if_stmt => Statement::ElseIf(required(pipeline)?),
        Rule::range_stmt => Statement::Range(required(pipeline)?),
        Rule::with_stmt => Statement::With(required(pipeline)?),
        Rule::else_stmt => Statement::Else,
        Rule::end_stmt => Statement::End,
        other => return Err(anyhow::anyhow!("unexpected {:?} in template action", other)),
    })
}

fn parse_pipeline(pair: Pair<'_, Rule>) -> Result<Pipeline> {
    let mut pipeline = Pipeline::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::declaration => {
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::variable => pipeline.decl.push(part.as_str().to_string()),
                        Rule::decl_op => pipeline.assign = part.as_str() == "=",
                        _ => {}
                    }
                }
            }
            Rule::command => pipeline.commands.push(parse_command(inner)?),
            _ => {}
        }
    }
    Ok(pipeline)
}

fn parse_command(pair: Pair<'_, Rule>) -> Result<Command> {
    let operands = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::operand)
        .map(parse_operand)
        .collect::<Result<Vec<_>>>()?;
    Ok(Command { operands })
}

fn parse_operand(pair: Pair<'_, Rule>) -> Result<Operand> {
    let mut inner = pair.into_inner();
    let term = inner.next().context("empty operand")?;
    let fields = inner
        .next()
        .map(|chain| split_fields(chain.as_str()))
        .unwrap_or_default();

    let term = match term.as_rule() {
        Rule::dot => Term::Dot,
        Rule::field => Term::Field(split_fields(term.as_str())),
        Rule::variable => Term::Variable(term.as_str().to_string()),
        Rule::identifier => Term::Function(term.as_str().to_string()),
        Rule::paren => {
            let pipeline = term
                .into_inner()
                .next()
                .context("empty parenthesised pipeline")?;
            Term::Pipeline(Box::new(parse_pipeline(pipeline)?))
        }
        Rule::string_lit => Term::Literal(ScalarValue::String(unquote(term.as_str())?)),
        Rule::raw_string => {
            let raw = term.as_str();
            Term::Literal(ScalarValue::String(raw[1..raw.len() - 1].to_string()))
        }
        Rule::int_lit => Term::Literal(ScalarValue::from(
            term.as_str()
                .parse::<i64>()
                .with_context(|| format!("integer literal '{}' out of range", term.as_str()))?,
        )),
        Rule::float_lit => Term::Literal(number_from_f64(
            term.as_str()
                .parse::<f64>()
                .with_context(|| format!("invalid float literal '{}'", term.as_str()))?,
        )),
        Rule::bool_lit => Term::Literal(ScalarValue::Bool(term.as_str() == "true")),
        Rule::nil_lit => Term::Literal(ScalarValue::Null),
        other => return Err(anyhow::anyhow!("unexpected {:?} in operand", other)),
    };
    Ok(Operand { term, fields })
}

fn split_fields(chain: &str) -> Vec<String> {
    chain
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn unquote(quoted: &str) -> Result<String> {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                return Err(anyhow::anyhow!("unknown escape sequence '\\{}' in {}", other, quoted));
            }
            None => return Err(anyhow::anyhow!("unterminated escape in {}", quoted)),
        }
    }
    Ok(out)
}

// `{{-` eats whitespace before the action, `-}}` eats whitespace after it.
fn apply_trim_markers(items: &mut [Item]) {
    for i in 0..items.len() {
        let (trim_left, trim_right) = match &items[i] {
            Item::Tag {
                trim_left,
                trim_right,
                ..
            } => (*trim_left, *trim_right),
            Item::Text(_) => continue,
        };
        if trim_left && i > 0 {
            if let Item::Text(text) = &mut items[i - 1] {
                text.truncate(text.trim_end().len());
            }
        }
        if trim_right && i + 1 < items.len() {
            if let Item::Text(text) = &mut items[i + 1] {
                *text = text.trim_start().to_string();
            }
        }
    }
}

fn build_block(items: &mut std::vec::IntoIter<Item>) -> Result<(Vec<Node>, Stop)> {
    let mut nodes = Vec::new();
    while let Some(item) = items.next() {
        let statement = match item {
            Item::Text(text) => {
                if !text.is_empty() {
                    nodes.push(Node::Text(text));
                }
                continue;
            }
            Item::Tag { statement, .. } => match statement {
                Some(statement) => statement,
                None => continue,
            },
        };
        match statement {
            Statement::Output(pipeline) => nodes.push(Node::Output(pipeline)),
            Statement::End => return Ok((nodes, Stop::End)),
            Statement::Else => return Ok((nodes, Stop::Else)),
            Statement::ElseIf(pipeline) => return Ok((nodes, Stop::ElseIf(pipeline))),
            Statement::If(pipeline) => nodes.push(build_if(items, pipeline)?),
            Statement::Range(pipeline) => {
                let (body, otherwise) = build_body(items, "range")?;
                nodes.push(Node::Range {
                    pipeline,
                    body,
                    otherwise,
                });
            }
            Statement::With(pipeline) => {
                let (body, otherwise) = build_body(items, "with")?;
                nodes.push(Node::With {
                    pipeline,
                    body,
                    otherwise,
                });
            }
        }
    }
    Ok((nodes, Stop::Eof))
}

fn build_if(items: &mut std::vec::IntoIter<Item>, first: Pipeline) -> Result<Node> {
    let mut branches = Vec::new();
    let mut condition = first;
    loop {
        let (body, stop) = build_block(items)?;
        branches.push((condition, body));
        match stop {
            Stop::End => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Stop::Else => {
                let (otherwise, stop) = build_block(items)?;
                expect_end(stop, "if")?;
                return Ok(Node::If {
                    branches,
                    otherwise,
                });
            }
            Stop::ElseIf(next) => condition = next,
            Stop::Eof => return Err(anyhow::anyhow!("unexpected EOF: unclosed {{{{if}}}}")),
        }
    }
}

fn build_body(
    items: &mut std::vec::IntoIter<Item>,
    keyword: &str,
) -> Result<(Vec<Node>, Vec<Node>)> {
    let (body, stop) = build_block(items)?;
    match stop {
        Stop::End => Ok((body, Vec::new())),
        Stop::Else => {
            let (otherwise, stop) = build_block(items)?;
            expect_end(stop, keyword)?;
            Ok((body, otherwise))
        }
        Stop::ElseIf(_) => Err(anyhow::anyhow!("{{{{else if}}}} is not allowed in {{{{{}}}}}", keyword)),
        Stop::Eof => Err(anyhow::anyhow!("unexpected EOF: unclosed {{{{{}}}}}", keyword)),
    }
}

fn expect_end(stop: Stop, keyword: &str) -> Result<()> {
    match stop {
        Stop::End => Ok(()),
        Stop::Eof => Err(anyhow::anyhow!("unexpected EOF: unclosed {{{{{}}}}}", keyword)),
        Stop::Else | Stop::ElseIf(_) => {
            Err(anyhow::anyhow!("{{{{{}}}}} has more than one {{{{else}}}}", keyword))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn only_output(source: &str) -> Pipeline {
        match parse(source).unwrap().as_slice() {
            [Node::Output(pipeline)] => pipeline.clone(),
            other => panic!("expected a single output action, got {other:?}"),
        }
    }

    #[test]
    fn text_is_kept_verbatim() {
        let nodes = parse("SELECT *\n  FROM test").unwrap();
        assert_eq!(nodes, vec![Node::Text("SELECT *\n  FROM test".to_string())]);
    }

    #[test]
    fn fields_and_pipes() {
        let pipeline = only_output("{{ .name | sqlString }}");
        assert_eq!(pipeline.commands.len(), 2);
        assert_eq!(
            pipeline.commands[0].operands[0].term,
            Term::Field(vec!["name".to_string()])
        );
        assert_eq!(
            pipeline.commands[1].operands[0].term,
            Term::Function("sqlString".to_string())
        );
    }

    #[test]
    fn literals_and_parenthesised_calls() {
        let pipeline = only_output(r#"{{ sqlColumn (subQuery "t2") "test2_id" 2 -1.5 true nil `raw` }}"#);
        let operands = &pipeline.commands[0].operands;
        assert_eq!(operands.len(), 8);
        assert!(matches!(operands[1].term, Term::Pipeline(_)));
        assert_eq!(operands[2].term, Term::Literal(json!("test2_id")));
        assert_eq!(operands[3].term, Term::Literal(json!(2)));
        assert_eq!(operands[4].term, Term::Literal(json!(-1.5)));
        assert_eq!(operands[5].term, Term::Literal(json!(true)));
        assert_eq!(operands[6].term, Term::Literal(json!(null)));
    }

    #[test]
    fn strings_may_contain_template_delimiters() {
        let pipeline = only_output(r#"{{ sqlSingle "SELECT {{ .x }} \"q\"" }}"#);
        assert_eq!(
            pipeline.commands[0].operands[1].term,
            Term::Literal(json!("SELECT {{ .x }} \"q\""))
        );
    }

    #[test]
    fn field_access_needs_adjacency() {
        let pipeline = only_output("{{ printf \"%s\" .Name }}");
        assert_eq!(pipeline.commands[0].operands.len(), 3);

        let pipeline = only_output("{{ $row.name }}");
        let operand = &pipeline.commands[0].operands[0];
        assert_eq!(operand.term, Term::Variable("$row".to_string()));
        assert_eq!(operand.fields, vec!["name".to_string()]);
    }

    #[test]
    fn declarations() {
        let pipeline = only_output("{{ $x := .a }}");
        assert_eq!(pipeline.decl, vec!["$x".to_string()]);
        assert!(!pipeline.assign);

        let nodes = parse("{{ range $i, $e := .items }}{{ $i }}{{ end }}").unwrap();
        match &nodes[0] {
            Node::Range { pipeline, body, .. } => {
                assert_eq!(pipeline.decl, vec!["$i".to_string(), "$e".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn control_blocks_nest() {
        let nodes = parse(
            "{{ if .a }}A{{ else if .b }}B{{ else }}{{ with .c }}C{{ end }}{{ end }}",
        )
        .unwrap();
        match &nodes[0] {
            Node::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(otherwise[0], Node::With { .. }));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn trim_markers_and_comments() {
        let nodes = parse("a  \n{{- /* note */ -}}\n  b {{- .x }} c").unwrap();
        assert_eq!(nodes[0], Node::Text("a".to_string()));
        assert_eq!(nodes[1], Node::Text("b".to_string()));
        assert!(matches!(nodes[2], Node::Output(_)));
        assert_eq!(nodes[3], Node::Text(" c".to_string()));
    }

    #[test]
    fn negative_numbers_are_not_trim_markers() {
        let pipeline = only_output("{{-3}}");
        assert_eq!(pipeline.commands[0].operands[0].term, Term::Literal(json!(-3)));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for source in [
            "{{ .a ",
            "{{ end }}",
            "{{ if .a }}x",
            "{{ range .a }}{{ else if .b }}{{ end }}",
            "{{ if .a }}{{ else }}{{ else }}{{ end }}",
            "{{ \"unterminated }}",
        ] {
            assert!(parse(source).is_err(), "{source}");
        }
    }
}
