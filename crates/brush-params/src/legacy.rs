// Reader for the `Namespace(key=value, ...)` repr that older runs wrote to
// `cfg_args`. Only literals are accepted: True, False, None, numbers and quoted
// strings.

use crate::{error::PersistedFormatError, persist::PersistedConfig, value::FieldValue};

const PREFIX: &str = "Namespace(";

pub(crate) fn is_namespace(text: &str) -> bool {
    text.trim_start().starts_with(PREFIX)
}

pub(crate) fn parse_namespace(text: &str) -> Result<PersistedConfig, PersistedFormatError> {
    let mut cursor = Cursor { text, pos: 0 };
    cursor.skip_ws();
    cursor.expect(PREFIX)?;

    let mut config = PersistedConfig::new();
    loop {
        cursor.skip_ws();
        if cursor.eat(')') {
            break;
        }
        let key = cursor.ident()?;
        cursor.skip_ws();
        cursor.expect("=")?;
        cursor.skip_ws();
        if let Some(value) = cursor.literal()? {
            config.insert(key, value);
        }
        cursor.skip_ws();
        if cursor.eat(',') {
            continue;
        }
        cursor.expect(")")?;
        break;
    }

    cursor.skip_ws();
    if cursor.pos != text.len() {
        return Err(cursor.error("trailing content after Namespace(...)"));
    }
    Ok(config)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> PersistedFormatError {
        PersistedFormatError::Literal {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), PersistedFormatError> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.error(format!("expected '{token}'")))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.text[start..self.pos]
    }

    fn ident(&mut self) -> Result<&'a str, PersistedFormatError> {
        if !self
            .peek()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Err(self.error("expected a field name"));
        }
        Ok(self.take_while(|c| c.is_ascii_alphanumeric() || c == '_'))
    }

    // `None` for a literal None.
    fn literal(&mut self) -> Result<Option<FieldValue>, PersistedFormatError> {
        match self.peek() {
            Some('\'' | '"') => self.string().map(|s| Some(FieldValue::Str(s))),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.number().map(Some)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                match self.take_while(|c| c.is_ascii_alphanumeric() || c == '_') {
                    "True" => Ok(Some(FieldValue::Bool(true))),
                    "False" => Ok(Some(FieldValue::Bool(false))),
                    "None" => Ok(None),
                    word => {
                        self.pos = start;
                        Err(self.error(format!("'{word}' is not a literal")))
                    }
                }
            }
            _ => Err(self.error("expected a literal value")),
        }
    }

    fn number(&mut self) -> Result<FieldValue, PersistedFormatError> {
        let start = self.pos;
        let raw = self.take_while(|c| {
            c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_')
        });
        let cleaned = raw.replace('_', "");
        let is_float = cleaned.contains(['.', 'e', 'E']);

        let value = if is_float {
            cleaned.parse::<f64>().ok().map(FieldValue::Float)
        } else {
            cleaned.parse::<i64>().ok().map(FieldValue::Int)
        };
        value.ok_or_else(|| {
            self.pos = start;
            self.error(format!("'{raw}' is not a number"))
        })
    }

    fn string(&mut self) -> Result<String, PersistedFormatError> {
        let Some(quote) = self.bump() else {
            return Err(self.error("expected a string"));
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self) -> Result<char, PersistedFormatError> {
        let c = match self.bump() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('x') => return self.hex_escape(2),
            Some('u') => return self.hex_escape(4),
            Some('U') => return self.hex_escape(8),
            Some(c @ ('\\' | '\'' | '"')) => c,
            _ => return Err(self.error("invalid escape in string")),
        };
        Ok(c)
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, PersistedFormatError> {
        let hex = self.rest().get(..digits).unwrap_or_default();
        let c = u32::from_str_radix(hex, 16)
            .ok()
            .filter(|_| hex.len() == digits)
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid hex escape"))?;
        self.pos += digits;
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_namespace() {
        assert!(parse_namespace("Namespace()").unwrap().is_empty());
        assert!(parse_namespace("  Namespace( )\n").unwrap().is_empty());
    }

    #[test]
    fn test_numbers() {
        let config = parse_namespace(
            "Namespace(a=30_000, b=1.6e-06, c=-1, d=0.01, e=1e10, f=-0.5)",
        )
        .unwrap();
        assert_eq!(config.get("a"), Some(&FieldValue::Int(30_000)));
        assert_eq!(config.get("b"), Some(&FieldValue::Float(1.6e-6)));
        assert_eq!(config.get("c"), Some(&FieldValue::Int(-1)));
        assert_eq!(config.get("d"), Some(&FieldValue::Float(0.01)));
        assert_eq!(config.get("e"), Some(&FieldValue::Float(1e10)));
        assert_eq!(config.get("f"), Some(&FieldValue::Float(-0.5)));
    }

    #[test]
    fn test_strings() {
        let config = parse_namespace(
            r#"Namespace(a='it\'s', b="C:\\data\\garden", c='caf\xe9', d='', e="a,b)")"#,
        )
        .unwrap();
        assert_eq!(config.get("a"), Some(&FieldValue::from("it's")));
        assert_eq!(config.get("b"), Some(&FieldValue::from(r"C:\data\garden")));
        assert_eq!(config.get("c"), Some(&FieldValue::from("café")));
        assert_eq!(config.get("d"), Some(&FieldValue::from("")));
        assert_eq!(config.get("e"), Some(&FieldValue::from("a,b)")));
    }

    #[test]
    fn test_rejects_code() {
        for text in [
            "Namespace(a=os.system('ls'))",
            "Namespace(a=inf)",
            "Namespace(a=[1, 2])",
            "Namespace(a=1) + 1",
            "Namespace(a=1",
            "Namespace(a='open",
            "Namespace(1=2)",
        ] {
            let err = parse_namespace(text);
            assert!(err.is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn test_error_offset() {
        let Err(PersistedFormatError::Literal { offset, .. }) = parse_namespace("Namespace(a=nan)")
        else {
            panic!("Expected a literal error");
        };
        assert_eq!(offset, "Namespace(a=".len());
    }
}
