//! ---
//! hmeta_section: "02-permission-model"
//! hmeta_subsection: "yaml"
//! hmeta_type: "source"
//! hmeta_scope: "code"
//! hmeta_description: "Block-style YAML emission matching the repository's committed formatting."
//! hmeta_version: "v0.0.0-prealpha"
//! hmeta_owner: "tbd"
//! ---
//! YAML reading and emission.
//!
//! Committed metadata is formatted with indented block sequences, two-space mapping
//! indentation, insertion-ordered keys and double-quoted numeric or empty strings.
//! [`to_yaml_string`] reproduces that layout so regenerated files produce no spurious
//! diffs. Long plain scalars are never folded.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::{Result, SchemaError};

const INDENT: usize = 2;

/// Parse a YAML file into `T`.
pub fn read_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` and write it with [`write_yaml_value`].
pub fn write_yaml_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let value = serde_yaml::to_value(value).map_err(|source| SchemaError::Convert {
        context: path.display().to_string(),
        source,
    })?;
    write_yaml_value(path, &value)
}

/// Write `value` to `path` through a sibling temporary file and a rename.
pub fn write_yaml_value(path: &Path, value: &Value) -> Result<()> {
    let io_err = |source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    };
    let rendered = to_yaml_string(value);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(rendered.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, path).map_err(io_err)
}

/// Render a value as a block-style YAML document.
pub fn to_yaml_string(value: &Value) -> String {
    let mut emitter = Emitter::default();
    emitter.document(value);
    emitter.out
}

#[derive(Default)]
struct Emitter {
    out: String,
}

impl Emitter {
    fn document(&mut self, value: &Value) {
        match value {
            Value::Mapping(map) if !map.is_empty() => self.mapping(map, 0, false),
            Value::Sequence(seq) if !seq.is_empty() => self.sequence(seq, 0, false),
            Value::String(text) if is_block_candidate(text) => self.literal(text, INDENT),
            Value::Tagged(tagged) => {
                let _ = write!(self.out, "{} ", tagged.tag);
                self.document(&tagged.value);
            }
            other => {
                self.out.push_str(&scalar(other));
                self.out.push('\n');
            }
        }
    }

    fn pad(&mut self, indent: usize) {
        self.out.extend(std::iter::repeat(' ').take(indent));
    }

    /// Block mapping at `indent`. With `inline_first` the first key continues the
    /// current line (a sequence item's dash).
    fn mapping(&mut self, map: &Mapping, indent: usize, inline_first: bool) {
        for (index, (key, value)) in map.iter().enumerate() {
            if index > 0 || !inline_first {
                self.pad(indent);
            }
            self.out.push_str(&key_repr(key));
            self.out.push(':');
            self.value_after_indicator(value, indent);
        }
    }

    fn sequence(&mut self, seq: &[Value], indent: usize, inline_first: bool) {
        for (index, item) in seq.iter().enumerate() {
            if index > 0 || !inline_first {
                self.pad(indent);
            }
            self.out.push('-');
            match item {
                Value::Mapping(map) if !map.is_empty() => {
                    self.out.push(' ');
                    self.mapping(map, indent + INDENT, true);
                }
                Value::Sequence(inner) if !inner.is_empty() => {
                    self.out.push(' ');
                    self.sequence(inner, indent + INDENT, true);
                }
                other => self.value_after_indicator(other, indent),
            }
        }
    }

    /// Emit the value following `key:` or `-` whose owner sits at `indent`.
    fn value_after_indicator(&mut self, value: &Value, indent: usize) {
        match value {
            Value::Mapping(map) if !map.is_empty() => {
                self.out.push('\n');
                self.mapping(map, indent + INDENT, false);
            }
            Value::Sequence(seq) if !seq.is_empty() => {
                self.out.push('\n');
                self.sequence(seq, indent + INDENT, false);
            }
            Value::String(text) if is_block_candidate(text) => {
                self.out.push(' ');
                self.literal(text, indent + INDENT);
            }
            Value::Tagged(tagged) => {
                let _ = write!(self.out, " {}", tagged.tag);
                self.value_after_indicator(&tagged.value, indent);
            }
            other => {
                self.out.push(' ');
                self.out.push_str(&scalar(other));
                self.out.push('\n');
            }
        }
    }

    fn literal(&mut self, text: &str, indent: usize) {
        self.out.push('|');
        let first_line = text.split('\n').find(|line| !line.is_empty());
        if first_line.is_some_and(|line| line.starts_with(' ')) {
            let _ = write!(self.out, "{INDENT}");
        }
        let body = text.trim_end_matches('\n');
        match text.len() - body.len() {
            0 => self.out.push('-'),
            1 => {}
            _ => self.out.push('+'),
        }
        self.out.push('\n');
        for line in body.split('\n') {
            if !line.is_empty() {
                self.pad(indent);
                self.out.push_str(line);
            }
            self.out.push('\n');
        }
        for _ in 1..text.len() - body.len() {
            self.out.push('\n');
        }
    }
}

/// Multi-line text that a literal block can carry verbatim.
fn is_block_candidate(text: &str) -> bool {
    text.contains('\n')
        && !text.trim().is_empty()
        && text.is_ascii()
        && !text
            .chars()
            .any(|ch| ch.is_control() && ch != '\n' && ch != '\t')
        && !text.lines().any(|line| line.ends_with(' '))
}

fn key_repr(key: &Value) -> String {
    match key {
        Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_) => {
            double_quoted(&serde_yaml::to_string(key).unwrap_or_default())
        }
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => string_repr(text),
        Value::Mapping(_) => "{}".to_string(),
        Value::Sequence(_) => "[]".to_string(),
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, scalar(&tagged.value)),
    }
}

fn string_repr(text: &str) -> String {
    if text.is_empty() || text.chars().all(char::is_numeric) || needs_double_quotes(text) {
        double_quoted(text)
    } else if needs_single_quotes(text) {
        format!("'{}'", text.replace('\'', "''"))
    } else {
        text.to_string()
    }
}

fn needs_double_quotes(text: &str) -> bool {
    text.chars()
        .any(|ch| !ch.is_ascii() || (ch.is_control() && ch != '\t') || ch == '\n')
}

fn needs_single_quotes(text: &str) -> bool {
    let Some(first) = text.chars().next() else {
        return true;
    };
    if resolves_to_other_type(text) {
        return true;
    }
    if text.starts_with([' ', '\t']) || text.ends_with([' ', '\t']) {
        return true;
    }
    if matches!(
        first,
        '!' | '&' | '*' | '[' | ']' | '{' | '}' | '#' | '\'' | '"' | '%' | '@' | '`' | '|' | '>' | ','
    ) {
        return true;
    }
    if matches!(first, '-' | '?' | ':') {
        let second = text[first.len_utf8()..].chars().next();
        if second.map_or(true, |ch| ch == ' ' || ch == '\t') {
            return true;
        }
        if text.starts_with("---") {
            return true;
        }
    }
    text.contains(": ") || text.contains(" #") || text.ends_with(':')
}

/// Plain scalars a YAML 1.1 loader would read as something other than a string.
fn resolves_to_other_type(text: &str) -> bool {
    const KEYWORDS: [&str; 9] = ["yes", "no", "on", "off", "true", "false", "null", "~", "="];
    let lowered = text.to_ascii_lowercase();
    if KEYWORDS.contains(&lowered.as_str()) {
        return true;
    }
    if matches!(lowered.as_str(), ".inf" | "-.inf" | "+.inf" | ".nan") {
        return true;
    }
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    if unsigned.is_empty() {
        return false;
    }
    let numeric_body = unsigned.replace('_', "");
    let textual_float = ["inf", "infinity", "nan"]
        .iter()
        .any(|word| numeric_body.eq_ignore_ascii_case(word));
    if !textual_float && numeric_body.parse::<f64>().is_ok() {
        return true;
    }
    if let Some(hex) = unsigned.strip_prefix("0x") {
        if !hex.is_empty() && hex.chars().all(|ch| ch.is_ascii_hexdigit() || ch == '_') {
            return true;
        }
    }
    if let Some(oct) = unsigned.strip_prefix("0o") {
        if !oct.is_empty() && oct.chars().all(|ch| ch.is_digit(8) || ch == '_') {
            return true;
        }
    }
    // sexagesimal (`1:30`) and date-like (`2024-01-31`) scalars
    let digits_and = |sep: char| {
        unsigned.contains(sep)
            && unsigned
                .split(sep)
                .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
    };
    digits_and(':') || (digits_and('-') && unsigned.split('-').count() == 3)
}

fn double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            ch if ch.is_ascii() && !ch.is_control() => out.push(ch),
            ch => {
                let code = ch as u32;
                let _ = if code <= 0xFF {
                    write!(out, "\\x{code:02X}")
                } else if code <= 0xFFFF {
                    write!(out, "\\u{code:04X}")
                } else {
                    write!(out, "\\U{code:08X}")
                };
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(text: &str) -> String {
        to_yaml_string(&serde_yaml::from_str(text).unwrap())
    }

    #[test]
    fn sequences_are_indented_under_keys() {
        let out = render("role: analyst\npermission:\n  columns: [a, b]\n  filter: {}\n  limit: 100\n");
        assert_eq!(
            out,
            "role: analyst\npermission:\n  columns:\n    - a\n    - b\n  filter: {}\n  limit: 100\n"
        );
    }

    #[test]
    fn mappings_inside_sequences_continue_on_the_dash_line() {
        let out = render(
            "table: {schema: public, name: orders}\nselect_permissions:\n- role: a\n  permission: {columns: [id], computed_fields: []}\n",
        );
        assert_eq!(
            out,
            "table:\n  schema: public\n  name: orders\nselect_permissions:\n  - role: a\n    permission:\n      columns:\n        - id\n      computed_fields: []\n"
        );
    }

    #[test]
    fn top_level_sequence_starts_at_column_zero() {
        let out = to_yaml_string(&Value::Sequence(vec![
            Value::from("!include public_a.yaml"),
            Value::from("plain"),
        ]));
        assert_eq!(out, "- '!include public_a.yaml'\n- plain\n");
    }

    #[test]
    fn numeric_and_empty_strings_are_double_quoted() {
        assert_eq!(string_repr("12345"), "\"12345\"");
        assert_eq!(string_repr(""), "\"\"");
        assert_eq!(string_repr("abc123"), "abc123");
    }

    #[test]
    fn ambiguous_strings_are_single_quoted() {
        assert_eq!(string_repr("true"), "'true'");
        assert_eq!(string_repr("NULL"), "'NULL'");
        assert_eq!(string_repr("1.5"), "'1.5'");
        assert_eq!(string_repr("-3"), "'-3'");
        assert_eq!(string_repr("2024-01-31"), "'2024-01-31'");
        assert_eq!(string_repr("a: b"), "'a: b'");
        assert_eq!(string_repr("it's"), "it's");
        assert_eq!(string_repr("'quoted'"), "'''quoted'''");
        assert_eq!(string_repr("- item"), "'- item'");
        assert_eq!(string_repr("-item"), "-item");
        assert_eq!(string_repr("_eq"), "_eq");
        assert_eq!(string_repr("X-Hasura-User-Id"), "X-Hasura-User-Id");
    }

    #[test]
    fn non_ascii_is_escaped() {
        assert_eq!(string_repr("caf\u{e9}"), "\"caf\\xE9\"");
    }

    #[test]
    fn multiline_strings_use_literal_blocks() {
        let mut map = Mapping::new();
        map.insert(Value::from("schema"), Value::from("type Query {\n\ta: Int\n}\n"));
        let out = to_yaml_string(&Value::Sequence(vec![Value::Mapping(map)]));
        assert_eq!(out, "- schema: |\n    type Query {\n    \ta: Int\n    }\n");
    }

    #[test]
    fn literal_without_trailing_newline_uses_strip_chomping() {
        let mut map = Mapping::new();
        map.insert(Value::from("text"), Value::from("one\ntwo"));
        assert_eq!(to_yaml_string(&Value::Mapping(map)), "text: |-\n  one\n  two\n");
    }

    #[test]
    fn emitted_documents_parse_back_to_the_same_value() {
        let source = "a:\n  - b: {c: [1, 2]}\n    d: ''\n  - []\n  - [x, [y]]\ne: '007'\nf: null\n";
        let value: Value = serde_yaml::from_str(source).unwrap();
        let reparsed: Value = serde_yaml::from_str(&to_yaml_string(&value)).unwrap();
        assert_eq!(reparsed, value);
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.yaml");
        fs::write(&path, "stale: true\n").unwrap();
        write_yaml_file(&path, &vec!["a", "1"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "- a\n- \"1\"\n");
        let loaded: Vec<String> = read_yaml_file(&path).unwrap();
        assert_eq!(loaded, vec!["a", "1"]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
