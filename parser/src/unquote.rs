//! Quote processing for string and character constants.

use errors::ParseErrorKind;

/// Decode the first (possibly escaped) character of `s`, returning it and
/// the unconsumed tail. `quote` is the surrounding quote character; an
/// unescaped occurrence of it is malformed here.
pub fn unquote_char(s: &str, quote: char) -> Result<(char, &str), ParseErrorKind> {
    let err = || ParseErrorKind::MalformedChar(s.to_string());

    let mut chars = s.chars();
    let c = chars.next().ok_or_else(err)?;
    if c == quote && (quote == '\'' || quote == '"') {
        return Err(err());
    }
    if c != '\\' {
        return Ok((c, &s[c.len_utf8()..]));
    }

    let esc = chars.next().ok_or_else(err)?;
    let rest = &s[c.len_utf8() + esc.len_utf8()..];
    match esc {
        'n' => Ok(('\n', rest)),
        't' => Ok(('\t', rest)),
        'b' => Ok(('\u{0008}', rest)),
        'r' => Ok(('\r', rest)),
        'f' => Ok(('\u{000C}', rest)),
        '\\' => Ok(('\\', rest)),
        '\'' | '"' => {
            if esc != quote {
                return Err(err());
            }
            Ok((esc, rest))
        }
        'u' => {
            let hex = rest.get(..4).ok_or_else(err)?;
            let val = u32::from_str_radix(hex, 16).map_err(|_| err())?;
            let decoded = char::from_u32(val).ok_or_else(err)?;
            Ok((decoded, &rest[4..]))
        }
        '0'..='7' => {
            let mut val = esc as u32 - '0' as u32;
            let mut consumed = 0;
            for digit in rest.chars().take(2) {
                if !digit.is_digit(8) {
                    break;
                }
                val = (val << 3) | (digit as u32 - '0' as u32);
                consumed += 1;
            }
            // a fourth octal digit is malformed
            if rest[consumed..].starts_with(|c: char| c.is_digit(8)) {
                return Err(err());
            }
            let decoded = char::from_u32(val).ok_or_else(err)?;
            Ok((decoded, &rest[consumed..]))
        }
        _ => Err(err()),
    }
}

/// Strip the quotes from a string constant and decode its escapes.
///
/// Double-quoted strings support the full escape set, character
/// constants must hold exactly one character, and raw back-quoted
/// strings keep newlines while dropping carriage returns.
pub fn unquote(s: &str) -> Result<String, ParseErrorKind> {
    let err = || ParseErrorKind::MalformedString(s.to_string());

    let mut chars = s.chars();
    let quote = chars.next().ok_or_else(err)?;
    if s.len() < 2 || !s.ends_with(quote) {
        return Err(err());
    }
    let inner = &s[quote.len_utf8()..s.len() - quote.len_utf8()];

    if quote == '`' {
        if inner.contains('`') {
            return Err(err());
        }
        return Ok(inner.replace('\r', ""));
    }
    if quote != '"' && quote != '\'' {
        return Err(err());
    }
    if inner.contains('\n') {
        return Err(err());
    }

    if !inner.contains('\\') && !inner.contains(quote) {
        match quote {
            '"' => return Ok(inner.to_string()),
            '\'' if inner.chars().count() == 1 => return Ok(inner.to_string()),
            _ => {}
        }
    }

    let mut out = String::new();
    let mut rest = inner;
    while !rest.is_empty() {
        let (c, tail) = unquote_char(rest, quote)?;
        out.push(c);
        rest = tail;
        if quote == '\'' && !rest.is_empty() {
            return Err(err());
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unquote_plain_string() {
        assert_eq!(Ok("hello".to_string()), unquote("\"hello\""));
    }

    #[test]
    fn unquote_escapes() {
        assert_eq!(Ok("a\nb\tc\"d\\e".to_string()), unquote(r#""a\nb\tc\"d\\e""#));
    }

    #[test]
    fn unquote_unicode_escape() {
        assert_eq!(Ok("snowman ☃".to_string()), unquote(r#""snowman \u2603""#));
    }

    #[test]
    fn unquote_octal_uses_three_bits_per_digit() {
        assert_eq!(Ok("A".to_string()), unquote(r#""\101""#));
        assert_eq!(Ok("\n".to_string()), unquote(r#""\12""#));
    }

    #[test]
    fn unquote_rejects_four_octal_digits() {
        assert!(unquote(r#""\1014""#).is_err());
    }

    #[test]
    fn unquote_raw_string_strips_carriage_returns() {
        assert_eq!(Ok("a\nb".to_string()), unquote("`a\r\nb`"));
    }

    #[test]
    fn unquote_char_constant() {
        assert_eq!(Ok("x".to_string()), unquote("'x'"));
        assert!(unquote("'xy'").is_err());
    }

    #[test]
    fn unquote_rejects_mismatched_quotes() {
        assert!(unquote("\"oops'").is_err());
        assert!(unquote("\"").is_err());
    }

    #[test]
    fn unquote_char_returns_tail() {
        assert_eq!(Ok(('x', "'")), unquote_char("x'", '\''));
        assert_eq!(Ok(('\n', "rest")), unquote_char("\\nrest", '"'));
    }
}
