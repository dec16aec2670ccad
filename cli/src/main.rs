use std::{fs, io::Write, process::exit};

use clap::Parser;
use stencil::{Template, Value};

/// Render a template file against JSON data
#[derive(Parser, Debug)]
#[command(name = "stencil", author, version, about, long_about = None)]
struct Args {
    /// Path to the template file
    path: String,

    /// Path to a JSON file providing the data value (defaults to null)
    #[arg(short, long)]
    data: Option<String>,

    /// Name of an associated template to render instead of the root
    #[arg(short, long)]
    name: Option<String>,

    /// Left action delimiter
    #[arg(long)]
    left_delim: Option<String>,

    /// Right action delimiter
    #[arg(long)]
    right_delim: Option<String>,
}

fn main() {
    let args = Args::parse();

    let text = match fs::read_to_string(&args.path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("reading {}: {err}", args.path);
            exit(1);
        }
    };

    let data = match &args.data {
        Some(path) => {
            let raw = match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(err) => {
                    eprintln!("reading {path}: {err}");
                    exit(1);
                }
            };
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(json) => Value::from(json),
                Err(err) => {
                    eprintln!("parsing {path}: {err}");
                    exit(1);
                }
            }
        }
        None => Value::Null,
    };

    let mut tmpl = Template::new(template_name(&args.path));
    tmpl.set_delims(args.left_delim.as_deref(), args.right_delim.as_deref());
    if let Err(err) = tmpl.parse(&text) {
        eprintln!("{err}");
        exit(1);
    }

    let mut out = vec![];
    let rendered = match &args.name {
        Some(name) => tmpl.execute_template(&mut out, name, &data),
        None => tmpl.execute(&mut out, &data),
    };
    if let Err(err) = rendered {
        eprintln!("{err}");
        exit(1);
    }

    let mut stdout = std::io::stdout();
    if let Err(err) = stdout.write_all(&out) {
        eprintln!("writing output: {err}");
        exit(1);
    }
}

fn template_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
