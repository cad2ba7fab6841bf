use regex_lite::Regex;
use std::sync::OnceLock;

/// Matches one `{{ ... }}` action, capturing trim markers and surrounding whitespace
fn action_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{\{(-?)(\s*)(.*?)(\s*)(-?)\}\}").ok())
        .as_ref()
}

/// Filter applied to single-variable `range` subjects so mappings iterate their values
pub const RANGE_VALUES_FILTER: &str = "range_values";

const GO_KEYWORDS: &[&str] = &[
    "range", "if", "else", "end", "with", "eq", "ne", "lt", "le", "gt", "ge", "and", "or", "not",
    "len", "index",
];

#[derive(Debug, PartialEq)]
enum BlockKind {
    For,
    If,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    /// What `.` refers to inside this block, if it was rebound
    dot: Option<String>,
}

/// Convert Go template syntax to Tera syntax.
///
/// Only actions that look like Go (`{{.Field}}`, `{{range ...}}`, `{{if ...}}`, `{{$v}}`,
/// `{{/* */}}`) are rewritten; anything else, including native Tera, passes through.
/// Go rebinds `.` inside `range` and `with`, so field access inside those blocks is
/// rewritten against the loop variable or the `with` subject.
pub fn convert_go_template_to_tera(content: &str) -> String {
    let Some(re) = action_re() else {
        return content.to_string();
    };
    let mut out = String::with_capacity(content.len());
    let mut stack: Vec<Block> = Vec::new();
    let mut last = 0;

    for caps in re.captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&content[last..whole.start()]);
        last = whole.end();

        let trim_l = caps.get(1).map_or("", |m| m.as_str());
        let ws_l = caps.get(2).map_or("", |m| m.as_str());
        let body = caps.get(3).map_or("", |m| m.as_str());
        let ws_r = caps.get(4).map_or("", |m| m.as_str());
        let trim_r = caps.get(5).map_or("", |m| m.as_str());

        if !is_go_action(body) {
            out.push_str(whole.as_str());
            continue;
        }

        if let Some(comment) = body.strip_prefix("/*").and_then(|c| c.strip_suffix("*/")) {
            out.push_str(&format!("{{#{}#}}", comment));
            continue;
        }

        match convert_action(body, &mut stack) {
            Action::Statement(stmt) => {
                out.push_str(&format!("{{%{} {} {}%}}", trim_l, stmt, trim_r));
            }
            Action::Expression(expr) => {
                out.push_str(&format!("{{{{{}{}{}{}{}}}}}", trim_l, ws_l, expr, ws_r, trim_r));
            }
        }
    }

    out.push_str(&content[last..]);
    out
}

fn is_go_action(body: &str) -> bool {
    if body.starts_with('.') || body.starts_with('$') || body.starts_with("/*") {
        return true;
    }
    let first = body.split_whitespace().next().unwrap_or("");
    GO_KEYWORDS.contains(&first)
}

enum Action {
    Statement(String),
    Expression(String),
}

fn current_dot(stack: &[Block]) -> Option<&str> {
    stack.iter().rev().find_map(|b| b.dot.as_deref())
}

fn convert_action(body: &str, stack: &mut Vec<Block>) -> Action {
    let (keyword, rest) = match body.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (body, ""),
    };

    match keyword {
        "range" => {
            let depth = stack.iter().filter(|b| b.kind == BlockKind::For).count();
            let (vars, subject) = split_declaration(rest);
            let subject = convert_expr(subject, current_dot(stack));
            let (stmt, dot) = match vars.as_slice() {
                [] => {
                    let var = if depth == 0 {
                        "item".to_string()
                    } else {
                        format!("item{}", depth + 1)
                    };
                    (
                        format!("for {} in {} | {}", var, subject, RANGE_VALUES_FILTER),
                        var,
                    )
                }
                [value] => (
                    format!("for {} in {} | {}", value, subject, RANGE_VALUES_FILTER),
                    value.clone(),
                ),
                [key, value, ..] => (
                    format!("for {}, {} in {}", key, value, subject),
                    value.clone(),
                ),
            };
            stack.push(Block { kind: BlockKind::For, dot: Some(dot) });
            Action::Statement(stmt)
        }
        "if" => {
            let cond = convert_expr(rest, current_dot(stack));
            stack.push(Block { kind: BlockKind::If, dot: None });
            Action::Statement(format!("if {}", cond))
        }
        "with" => {
            let subject = convert_expr(rest, current_dot(stack));
            stack.push(Block {
                kind: BlockKind::If,
                dot: Some(subject.clone()),
            });
            Action::Statement(format!("if {}", subject))
        }
        "else" => match rest.strip_prefix("if ") {
            Some(cond) => Action::Statement(format!(
                "elif {}",
                convert_expr(cond.trim(), current_dot(stack))
            )),
            None => Action::Statement("else".to_string()),
        },
        "end" => match stack.pop() {
            Some(Block { kind: BlockKind::For, .. }) => Action::Statement("endfor".to_string()),
            _ => Action::Statement("endif".to_string()),
        },
        _ if body.starts_with('$') && body.contains(":=") => {
            let (vars, value) = split_declaration(body);
            let name = vars.first().cloned().unwrap_or_default();
            Action::Statement(format!("set {} = {}", name, convert_expr(value, current_dot(stack))))
        }
        _ => Action::Expression(convert_expr(body, current_dot(stack))),
    }
}

/// Split `$k, $v := .Items` into (["k", "v"], ".Items")
fn split_declaration(s: &str) -> (Vec<String>, &str) {
    match s.split_once(":=") {
        Some((vars, subject)) => {
            let names = vars
                .split(',')
                .map(|v| v.trim().trim_start_matches('$').to_string())
                .filter(|v| !v.is_empty())
                .collect();
            (names, subject.trim())
        }
        None => (Vec::new(), s.trim()),
    }
}

/// Convert a Go pipeline-free expression (operand or function call) to Tera
fn convert_expr(expr: &str, dot: Option<&str>) -> String {
    let tokens = tokenize(expr);
    let Some((head, args)) = tokens.split_first() else {
        return String::new();
    };

    let operands: Vec<String> = args.iter().map(|a| convert_operand(a, dot)).collect();

    let binary = |op: &str| -> Option<String> {
        match operands.as_slice() {
            [a, b] => Some(format!("{} {} {}", a, op, b)),
            _ => None,
        }
    };

    let converted = match head.as_str() {
        "eq" => match operands.split_first() {
            Some((a, rest)) if !rest.is_empty() => Some(
                rest.iter()
                    .map(|b| format!("{} == {}", a, b))
                    .collect::<Vec<_>>()
                    .join(" or "),
            ),
            _ => None,
        },
        "ne" => binary("!="),
        "lt" => binary("<"),
        "le" => binary("<="),
        "gt" => binary(">"),
        "ge" => binary(">="),
        "and" if !operands.is_empty() => Some(operands.join(" and ")),
        "or" if !operands.is_empty() => Some(operands.join(" or ")),
        "not" if operands.len() == 1 => Some(format!("not {}", operands[0])),
        "len" if operands.len() == 1 => Some(format!("{} | length", operands[0])),
        "index" if operands.len() == 2 => Some(format!("{}[{}]", operands[0], operands[1])),
        _ => None,
    };

    converted.unwrap_or_else(|| {
        tokens
            .iter()
            .map(|t| convert_operand(t, dot))
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn convert_operand(token: &str, dot: Option<&str>) -> String {
    if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return format!("({})", convert_expr(inner, dot));
    }
    if token == "." {
        return dot.unwrap_or("__tera_context").to_string();
    }
    if let Some(path) = token.strip_prefix('.') {
        return match dot {
            Some(d) => format!("{}.{}", d, path),
            None => path.to_string(),
        };
    }
    if let Some(var) = token.strip_prefix('$') {
        return var.to_string();
    }
    token.to_string()
}

/// Split on whitespace, keeping quoted strings and parenthesised groups intact
fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in expr.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                c if c.is_whitespace() && depth == 0 => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
        .into_iter()
        .map(|t| match t.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
            Some(raw) => format!("\"{}\"", raw),
            None => t,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_template_simple() {
        let go = "hostname {{.Hostname}}\nip {{.IP}}";
        let tera = convert_go_template_to_tera(go);
        assert_eq!(tera, "hostname {{Hostname}}\nip {{IP}}");
    }

    #[test]
    fn test_dotted_data_access() {
        assert_eq!(convert_go_template_to_tera("A={{.Data.site}}"), "A={{Data.site}}");
        assert_eq!(convert_go_template_to_tera("{{ .Name }}.yaml"), "{{ Name }}.yaml");
    }

    #[test]
    fn test_tera_passthrough() {
        let tera = "hostname {{Hostname}}\n{% if Data.ntp %}ntp{% endif %}";
        assert_eq!(convert_go_template_to_tera(tera), tera);
    }

    #[test]
    fn test_literal_passthrough() {
        let text = "system {\n    host-name r1;\n}\n";
        assert_eq!(convert_go_template_to_tera(text), text);
    }

    #[test]
    fn test_go_template_if() {
        let go = "{{if .Vendor}}has vendor{{else}}no vendor{{end}}";
        let tera = convert_go_template_to_tera(go);
        assert_eq!(tera, "{% if Vendor %}has vendor{% else %}no vendor{% endif %}");
    }

    #[test]
    fn test_go_template_if_eq() {
        let go = r#"{{if eq .Platform "mx"}}mx{{else if ne .Platform "srx"}}other{{end}}"#;
        assert_eq!(
            convert_go_template_to_tera(go),
            r#"{% if Platform == "mx" %}mx{% elif Platform != "srx" %}other{% endif %}"#
        );
    }

    #[test]
    fn test_go_template_range() {
        let go = "{{range .Items}}item{{end}}";
        let tera = convert_go_template_to_tera(go);
        assert_eq!(tera, "{% for item in Items | range_values %}item{% endfor %}");
    }

    #[test]
    fn test_range_rebinds_dot() {
        let go = "{{range .Data.interfaces}}{{.name}} {{.}}{{end}}";
        assert_eq!(
            convert_go_template_to_tera(go),
            "{% for item in Data.interfaces | range_values %}{{item.name}} {{item}}{% endfor %}"
        );
    }

    #[test]
    fn test_range_with_variables() {
        let go = "{{range $name, $vlan := .Data.vlans}}{{$name}}={{$vlan.id}}{{end}}";
        assert_eq!(
            convert_go_template_to_tera(go),
            "{% for name, vlan in Data.vlans %}{{name}}={{vlan.id}}{% endfor %}"
        );
    }

    #[test]
    fn test_nested_range_names() {
        let go = "{{range .A}}{{range .b}}{{.}}{{end}}{{end}}";
        assert_eq!(
            convert_go_template_to_tera(go),
            "{% for item in A | range_values %}{% for item2 in item.b | range_values %}{{item2}}{% endfor %}{% endfor %}"
        );
    }

    #[test]
    fn test_with_block() {
        let go = "{{with .Data.snmp}}community {{.community}};{{end}}";
        assert_eq!(
            convert_go_template_to_tera(go),
            "{% if Data.snmp %}community {{Data.snmp.community}};{% endif %}"
        );
    }

    #[test]
    fn test_trim_markers_are_kept() {
        let go = "a\n{{- if .X -}}\nb\n{{- end}}";
        assert_eq!(convert_go_template_to_tera(go), "a\n{%- if X -%}\nb\n{%- endif %}");
    }

    #[test]
    fn test_comment_and_assignment() {
        let go = "{{/* site */}}{{$s := .Data.site}}{{$s}}";
        assert_eq!(convert_go_template_to_tera(go), "{# site #}{% set s = Data.site %}{{s}}");
    }
}
