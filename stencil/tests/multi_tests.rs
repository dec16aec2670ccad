//! Tests for multiple-template parsing and execution.

use pretty_assertions::assert_eq;
use serde_json::json;
use stencil::{Template, Value};

struct TestMultiParse {
    name: &'static str,
    input: &'static str,
    has_error: bool,
    names: &'static [&'static str],
    results: &'static [&'static str],
}

#[test]
fn multi_parse_table() {
    let tests = vec![
        TestMultiParse {
            name: "empty",
            input: "",
            has_error: false,
            names: &[],
            results: &[],
        },
        TestMultiParse {
            name: "one",
            input: "{{define \"foo\"}} FOO {{end}}",
            has_error: false,
            names: &["foo"],
            results: &[" FOO "],
        },
        TestMultiParse {
            name: "two",
            input: "{{define \"foo\"}} FOO {{end}}{{define \"bar\"}} BAR {{end}}",
            has_error: false,
            names: &["foo", "bar"],
            results: &[" FOO ", " BAR "],
        },
        TestMultiParse {
            name: "missing end",
            input: "{{define \"foo\"}} FOO ",
            has_error: true,
            names: &[],
            results: &[],
        },
        TestMultiParse {
            name: "malformed name",
            input: "{{define \"foo}} FOO ",
            has_error: true,
            names: &[],
            results: &[],
        },
    ];

    for test in tests {
        let tmpl = Template::new(test.name);
        let parsed = tmpl.parse(test.input);
        if test.has_error {
            assert!(
                parsed.is_err(),
                "{}: expected error; got none",
                test.name
            );
            continue;
        }
        parsed.unwrap_or_else(|e| panic!("{}: unexpected error: {e}", test.name));
        for (name, want) in test.names.iter().zip(test.results) {
            let sub = tmpl
                .template(name)
                .unwrap_or_else(|| panic!("{}: can't find template {name}", test.name));

            assert_eq!(
                *want,
                sub.root_string().unwrap(),
                "{}=({})",
                test.name,
                test.input
            );
        }
    }
}

#[test]
fn defined_templates_render() {
    let tmpl = Template::new("root");
    tmpl.parse("{{define \"foo\"}} FOO {{end}}{{define \"bar\"}} BAR {{end}}")
        .unwrap();

    let mut out = vec![];
    tmpl.execute_template(&mut out, "foo", &Value::Null).unwrap();
    assert_eq!(" FOO ", String::from_utf8(out).unwrap());

    let mut out = vec![];
    tmpl.execute_template(&mut out, "bar", &Value::Null).unwrap();
    assert_eq!(" BAR ", String::from_utf8(out).unwrap());
}

#[test]
fn unterminated_define_reports_position() {
    let tmpl = Template::new("broken");
    let err = tmpl.parse("{{define \"foo\"}} FOO ").unwrap_err();
    let message = err.to_string();

    assert!(message.starts_with("broken:1:"), "{message}");
    assert!(message.contains("unexpected EOF"), "{message}");
}

#[test]
fn empty_redefinition_keeps_existing_body() {
    let tmpl = Template::new("root");
    tmpl.parse("{{define \"foo\"}}body{{end}}").unwrap();
    tmpl.parse("{{define \"foo\"}} {{end}}").unwrap();

    assert_eq!("body", tmpl.template("foo").unwrap().root_string().unwrap());
}

#[test]
fn nonempty_redefinition_replaces() {
    let tmpl = Template::new("root");
    tmpl.parse("{{define \"foo\"}}old{{end}}").unwrap();
    tmpl.parse("{{define \"foo\"}}new{{end}}").unwrap();

    assert_eq!("new", tmpl.template("foo").unwrap().root_string().unwrap());
}

#[test]
fn associated_templates_share_a_group() {
    let root = Template::new("page");
    root.parse("page: {{template \"footer\"}}").unwrap();

    let footer = Template::new_associated("footer", &root);
    footer.parse("(c) stencil").unwrap();

    let mut out = vec![];
    root.execute(&mut out, &Value::Null).unwrap();

    assert_eq!("page: (c) stencil", String::from_utf8(out).unwrap());
}

#[test]
fn cross_template_invocation_with_pipe() {
    let tmpl = Template::new("main");
    tmpl.parse(
        "{{define \"item\"}}[{{.name}}]{{end}}{{for .items}}{{template \"item\" .}}{{end}}",
    )
    .unwrap();

    let mut out = vec![];
    tmpl.execute(
        &mut out,
        &Value::from(json!({"items": [{"name": "a"}, {"name": "b"}]})),
    )
    .unwrap();

    assert_eq!("[a][b]", String::from_utf8(out).unwrap());
}

#[test]
fn execute_template_unknown_name() {
    let tmpl = Template::new("root");
    tmpl.parse("x").unwrap();

    let mut out = vec![];
    let err = tmpl
        .execute_template(&mut out, "ghost", &Value::Null)
        .unwrap_err();

    assert!(
        err.to_string()
            .contains("no template ghost associated with template root"),
        "{err}"
    );
}

#[test]
fn executing_unparsed_template_is_incomplete() {
    let tmpl = Template::new("empty");
    let mut out = vec![];
    let err = tmpl.execute(&mut out, &Value::Null).unwrap_err();

    assert!(
        err.to_string().contains("incomplete or empty template"),
        "{err}"
    );
}

#[test]
fn parse_is_idempotent_on_rendered_form() {
    let sources = [
        "a{{.b}}c",
        "{{if .ok}}y{{else}}n{{end}}",
        "{{for .xs}}{{.}}{{end}}",
        "{{$v := .x}}{{$v}}",
        "Hello {{ .email | default \"user@host.com\" }}",
    ];
    for source in sources {
        let first = Template::new("t");
        first.parse(source).unwrap();
        let rendered = first.root_string().unwrap();

        let second = Template::new("t");
        second.parse(&rendered).unwrap();

        assert_eq!(rendered, second.root_string().unwrap(), "source: {source}");
    }
}

#[test]
fn templates_lists_group_members() {
    let tmpl = Template::new("root");
    tmpl.parse("{{define \"a\"}}1{{end}}{{define \"b\"}}2{{end}}")
        .unwrap();

    let mut names: Vec<String> = tmpl
        .templates()
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    names.sort();

    assert_eq!(vec!["a", "b", "root"], names);
}

#[test]
fn parse_inputs_first_key_is_root() {
    let tmpl = Template::parse_inputs(
        None,
        &[("main", "-{{template \"part\"}}-"), ("part", "X")],
    )
    .unwrap();

    assert_eq!("main", tmpl.name());

    let mut out = vec![];
    tmpl.execute(&mut out, &Value::Null).unwrap();

    assert_eq!("-X-", String::from_utf8(out).unwrap());
}

#[test]
fn parse_inputs_requires_input() {
    assert!(Template::parse_inputs(None, &[]).is_err());
}

#[test]
fn multiline_template_reports_error_line() {
    let source = textwrap::dedent(
        "
        greetings
        {{define \"signature\"}}-- the team{{end}}
        {{for .recipients}}
        ",
    );

    let tmpl = Template::new("letter");
    let err = tmpl.parse(source.trim_start()).unwrap_err();
    let message = err.to_string();

    assert!(message.starts_with("letter:4:"), "{message}");
    assert!(message.contains("unexpected EOF"), "{message}");
}
