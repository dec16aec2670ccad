//! Classic C-style formatting for the `printf` built-in.

use crate::value::Value;

#[derive(Default, Clone, Copy)]
struct Flags {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
}

/// Render `format`, consuming one argument per verb.
///
/// Supported verbs: `%%`, `s`, `d`, `i`, `b`, `o`, `x`, `X`, `c`, `e`,
/// `E`, `g`, `f`, with the `-`, `0`, `+` and space flags plus width and
/// precision.
pub fn sprintf(format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    let mut next_arg = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut flags = Flags::default();
        loop {
            match chars.peek() {
                Some('-') => flags.left = true,
                Some('0') => flags.zero = true,
                Some('+') => flags.plus = true,
                Some(' ') => flags.space = true,
                _ => break,
            }
            chars.next();
        }

        let mut width: Option<usize> = None;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = Some(width.unwrap_or(0) * 10 + d as usize);
            chars.next();
        }

        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }

        let verb = chars
            .next()
            .ok_or_else(|| "format string ends mid-verb".to_string())?;
        let arg = args
            .get(next_arg)
            .ok_or_else(|| format!("not enough arguments for format {format:?}"))?;
        next_arg += 1;

        let piece = format_verb(verb, arg, flags, precision)?;
        out.push_str(&pad(piece, width, flags));
    }

    Ok(out)
}

fn format_verb(
    verb: char,
    arg: &Value,
    flags: Flags,
    precision: Option<usize>,
) -> Result<String, String> {
    match verb {
        's' => {
            let mut s = arg.to_string();
            if let Some(p) = precision {
                s = s.chars().take(p).collect();
            }
            Ok(s)
        }
        'd' | 'i' => Ok(signed(int_arg(arg, verb)?, flags)),
        'o' => Ok(format!("{:o}", int_arg(arg, verb)?)),
        'x' => Ok(format!("{:x}", int_arg(arg, verb)?)),
        'X' => Ok(format!("{:X}", int_arg(arg, verb)?)),
        'c' => {
            let code = int_arg(arg, verb)?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| format!("invalid character code {code}"))?;
            Ok(c.to_string())
        }
        'b' => {
            let truth = match arg {
                Value::Null => false,
                Value::Bool(b) => *b,
                _ => true,
            };
            Ok(truth.to_string())
        }
        'f' => Ok(format!("{:.*}", precision.unwrap_or(6), float_arg(arg, verb)?)),
        'e' => Ok(format!("{:e}", float_arg(arg, verb)?)),
        'E' => Ok(format!("{:E}", float_arg(arg, verb)?)),
        'g' => Ok(float_arg(arg, verb)?.to_string()),
        _ => Err(format!("unsupported format verb %{verb}")),
    }
}

fn int_arg(arg: &Value, verb: char) -> Result<i64, String> {
    match arg {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        other => Err(format!("%{verb} needs an integer, got {}", other.type_name())),
    }
}

fn float_arg(arg: &Value, verb: char) -> Result<f64, String> {
    match arg {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(format!("%{verb} needs a number, got {}", other.type_name())),
    }
}

fn signed(value: i64, flags: Flags) -> String {
    if value >= 0 {
        if flags.plus {
            return format!("+{value}");
        }
        if flags.space {
            return format!(" {value}");
        }
    }

    value.to_string()
}

fn pad(piece: String, width: Option<usize>, flags: Flags) -> String {
    let Some(width) = width else {
        return piece;
    };
    let len = piece.chars().count();
    if len >= width {
        return piece;
    }
    let fill = width - len;
    if flags.left {
        return format!("{piece}{}", " ".repeat(fill));
    }
    if flags.zero {
        // the sign stays in front of the zeros
        if let Some(rest) = piece.strip_prefix(['-', '+']) {
            let sign = &piece[..1];
            return format!("{sign}{}{rest}", "0".repeat(fill));
        }
        return format!("{}{piece}", "0".repeat(fill));
    }

    format!("{}{piece}", " ".repeat(fill))
}
