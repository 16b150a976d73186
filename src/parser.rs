//! Load template markup into a [`Document`] and parse field specs, using PEST.

use crate::ast::*;
use crate::error::Error;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct TemplateParser;

/// Root element name of every template.
pub const ROOT_TAG: &str = "template";

/// Separator between choice alternatives.
pub const CHOICE_SEPARATOR: char = '|';

/// Upper bound on the byte count of one `bytes` field.
pub const MAX_BYTE_COUNT: u32 = 1 << 20;

/// Parse template markup into a document.
pub fn parse(source: &str) -> Result<Document, Error> {
    let pairs = TemplateParser::parse(Rule::document, source)
        .map_err(|e| Error::Template(format!("Parse error: {}", e)))?;
    let document = pairs.into_iter().next().ok_or_else(|| Error::Template("Empty parse".to_string()))?;
    let root = document
        .into_inner()
        .find(|p| p.as_rule() == Rule::element)
        .ok_or_else(|| Error::Template("missing root element".to_string()))?;
    build_document(build_element(root)?)
}

/// Read and parse a template file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Document, Error> {
    let source = std::fs::read_to_string(path.as_ref())?;
    parse(&source)
}

// ==================== Markup ====================

/// One markup element before it is interpreted as a field.
#[derive(Debug)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn attr(&self, names: &[&str]) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| names.contains(&k.as_str()))
            .map(|(_, v)| v.as_str())
    }
}

fn build_element(pair: pest::iterators::Pair<Rule>) -> Result<Element, Error> {
    let mut name = String::new();
    let mut attributes = Vec::new();
    let mut children = Vec::new();
    let mut text = String::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::name => name = inner.as_str().to_string(),
            Rule::attribute => {
                let mut it = inner.into_inner();
                let key = it.next().ok_or_else(|| Error::Template("attribute: name".to_string()))?;
                let value = it.next().map(|v| v.as_str()).unwrap_or("");
                let key = key.as_str().to_string();
                if attributes.iter().any(|(k, _)| *k == key) {
                    return Err(Error::Template(format!("<{}>: duplicate attribute `{}`", name, key)));
                }
                attributes.push((key, unescape(value)?));
            }
            Rule::element => children.push(build_element(inner)?),
            Rule::char_data => text.push_str(&unescape(inner.as_str())?),
            Rule::close_tag => {
                let close = inner.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                if close != name {
                    return Err(Error::Template(format!(
                        "mismatched closing tag </{}> for <{}>",
                        close, name
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(Element {
        name,
        attributes,
        children,
        text,
    })
}

fn unescape(s: &str) -> Result<String, Error> {
    if !s.contains('&') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let semi = rest[amp..]
            .find(';')
            .ok_or_else(|| Error::Template(format!("unterminated entity in {:?}", s)))?;
        let entity = &rest[amp + 1..amp + semi];
        let c = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| Error::Template(format!("unknown entity &{};", entity)))?
            }
        };
        out.push(c);
        rest = &rest[amp + semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ==================== Document ====================

fn build_document(root: Element) -> Result<Document, Error> {
    if root.name != ROOT_TAG {
        return Err(Error::Template(format!(
            "unknown root <{}> (expected <{}>)",
            root.name, ROOT_TAG
        )));
    }
    let mut doc = Document::new();
    if let Some(name) = root.attr(&["encoding"]) {
        doc.encoding = TextEncoding::from_name(name)
            .ok_or_else(|| Error::Template(format!("unknown encoding `{}`", name)))?;
    }
    if let Some(name) = root.attr(&["choice-length"]) {
        doc.choice_length = ChoiceLength::from_name(name)
            .ok_or_else(|| Error::Template(format!("unknown choice-length `{}`", name)))?;
    }

    let (mut seen_text, mut seen_data, mut seen_priority) = (false, false, false);
    for section in root.children {
        let seen = match section.name.as_str() {
            "text" => &mut seen_text,
            "data" => &mut seen_data,
            "priority" => &mut seen_priority,
            other => return Err(Error::Template(format!("unknown section <{}>", other))),
        };
        if *seen {
            return Err(Error::Template(format!("duplicate section <{}>", section.name)));
        }
        *seen = true;
        match section.name.as_str() {
            "text" => {
                let parent = doc.text();
                for child in section.children {
                    add_field(&mut doc, parent, child)?;
                }
            }
            "data" => {
                let parent = doc.data();
                for child in section.children {
                    add_field(&mut doc, parent, child)?;
                }
            }
            _ => {
                for entry in section.children {
                    doc.push_priority(entry.name);
                }
            }
        }
    }
    if !seen_text {
        return Err(Error::Template("missing <text> section".to_string()));
    }
    Ok(doc)
}

fn add_field(doc: &mut Document, parent: NodeId, el: Element) -> Result<(), Error> {
    let tag = el.name.as_str();
    let kind = match el.attr(&["kind", "type"]) {
        Some(k) => k.to_string(),
        None if !el.children.is_empty() => "group".to_string(),
        None => return Err(Error::Template(format!("<{}>: missing `kind`", tag))),
    };
    if kind != "group" && !el.children.is_empty() {
        return Err(Error::Template(format!("<{}>: {} field cannot have children", tag, kind)));
    }
    let spec = match el.attr(&["spec", "value"]) {
        Some(s) => s.to_string(),
        None if kind == "group" => String::new(),
        None if !el.text.trim().is_empty() => el.text.clone(),
        None => return Err(Error::Template(format!("<{}>: missing `spec`", tag))),
    };
    let field = match kind.as_str() {
        "literal" | "string" => Field::Literal(spec.clone()),
        "choice" | "strings" => Field::Choice(parse_choices(&spec)),
        "bytes" => Field::RandomBytes(parse_bytes_spec(tag, &spec)?),
        "bits" => Field::RandomBits(parse_bits_spec(tag, &spec)?),
        "function" => Field::Function(parse_function_spec(tag, &spec)?),
        "group" => Field::Group(Vec::new()),
        other => return Err(Error::Template(format!("<{}>: unknown kind `{}`", tag, other))),
    };
    let id = doc.add_node(parent, tag, &spec, field)?;
    for child in el.children {
        add_field(doc, id, child)?;
    }
    Ok(())
}

// ==================== Field specs ====================

pub fn parse_choices(spec: &str) -> Vec<String> {
    spec.split(CHOICE_SEPARATOR).map(str::to_string).collect()
}

/// Parse `<count>:<range>[<range>...]` (or `<count>:<value>`).
pub fn parse_range_spec(tag: &str, spec: &str) -> Result<RangeSpec, Error> {
    let pairs = TemplateParser::parse(Rule::range_spec, spec).map_err(|e| {
        if missing_range_delimiter(spec) {
            Error::spec(tag, spec, "missing range delimiter `~`")
        } else {
            Error::spec(tag, spec, e.variant.message().into_owned())
        }
    })?;
    let pair = pairs.into_iter().next().ok_or_else(|| Error::spec(tag, spec, "empty spec"))?;
    let mut count = None;
    let mut ranges = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::count => {
                let c = inner.into_inner().next().ok_or_else(|| Error::spec(tag, spec, "count"))?;
                count = Some(match c.as_rule() {
                    Rule::range => {
                        let r = build_range(tag, spec, c)?;
                        let low = u32::try_from(r.low).map_err(|_| Error::spec(tag, spec, "count too large"))?;
                        let high = u32::try_from(r.high).map_err(|_| Error::spec(tag, spec, "count too large"))?;
                        Count::Range { low, high }
                    }
                    _ => Count::Fixed(
                        u32::try_from(parse_int(tag, spec, c.as_str())?)
                            .map_err(|_| Error::spec(tag, spec, "count too large"))?,
                    ),
                });
            }
            Rule::range => ranges.push(build_range(tag, spec, inner)?),
            Rule::value => {
                let v = parse_int(tag, spec, inner.as_str())?;
                ranges.push(ValueRange { low: v, high: v });
            }
            _ => {}
        }
    }
    let count = count.ok_or_else(|| Error::spec(tag, spec, "missing count"))?;
    Ok(RangeSpec { count, ranges })
}

fn parse_bytes_spec(tag: &str, spec: &str) -> Result<RangeSpec, Error> {
    let parsed = parse_range_spec(tag, spec)?;
    let max_count = match parsed.count {
        Count::Fixed(n) => n,
        Count::Range { high, .. } => high,
    };
    if max_count > MAX_BYTE_COUNT {
        return Err(Error::spec(
            tag,
            spec,
            format!("byte count {} exceeds {}", max_count, MAX_BYTE_COUNT),
        ));
    }
    if let Some(r) = parsed.ranges.iter().find(|r| r.high > u64::from(u8::MAX)) {
        return Err(Error::spec(tag, spec, format!("byte value {:#x} exceeds 0xff", r.high)));
    }
    Ok(parsed)
}

fn parse_bits_spec(tag: &str, spec: &str) -> Result<RangeSpec, Error> {
    let parsed = parse_range_spec(tag, spec)?;
    let max_width = match parsed.count {
        Count::Fixed(n) => n,
        Count::Range { high, .. } => high,
    };
    if max_width > u32::from(crate::value::BitPattern::MAX_WIDTH) {
        return Err(Error::spec(tag, spec, "bit fields are limited to 64 bits"));
    }
    if let Count::Fixed(width) = parsed.count {
        if let Some(r) = parsed.ranges.iter().find(|r| width < 64 && r.high >> width != 0) {
            return Err(Error::spec(
                tag,
                spec,
                format!("value {:#x} does not fit in {} bit(s)", r.high, width),
            ));
        }
    }
    Ok(parsed)
}

/// Parse `name:[arg][arg]...`.
pub fn parse_function_spec(tag: &str, spec: &str) -> Result<FunctionCall, Error> {
    let pairs = TemplateParser::parse(Rule::function_spec, spec)
        .map_err(|e| Error::spec(tag, spec, e.variant.message().into_owned()))?;
    let pair = pairs.into_iter().next().ok_or_else(|| Error::spec(tag, spec, "empty spec"))?;
    let mut name = String::new();
    let mut args = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::argument => {
                let arg = inner.into_inner().next().map(|p| p.as_str().trim()).unwrap_or("");
                if arg.is_empty() {
                    return Err(Error::spec(tag, spec, "empty argument"));
                }
                args.push(arg.to_string());
            }
            _ => {}
        }
    }
    Ok(FunctionCall { name, args })
}

fn build_range(tag: &str, spec: &str, pair: pest::iterators::Pair<Rule>) -> Result<ValueRange, Error> {
    let mut it = pair.into_inner();
    let low = parse_int(tag, spec, it.next().ok_or_else(|| Error::spec(tag, spec, "range low"))?.as_str())?;
    let high = parse_int(tag, spec, it.next().ok_or_else(|| Error::spec(tag, spec, "range high"))?.as_str())?;
    if low > high {
        return Err(Error::spec(tag, spec, format!("empty range [{}~{}]", low, high)));
    }
    Ok(ValueRange { low, high })
}

fn parse_int(tag: &str, spec: &str, s: &str) -> Result<u64, Error> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| Error::spec(tag, spec, format!("integer out of range: {}", s)))
}

fn missing_range_delimiter(spec: &str) -> bool {
    let mut rest = spec;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            return false;
        };
        let inner = &rest[open + 1..open + close];
        if !inner.contains('~') && !inner.contains('-') {
            return true;
        }
        rest = &rest[open + close + 1..];
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_spec_with_hex_and_multiple_ranges() {
        let r = parse_range_spec("f", "10:[0x1~0x20][0x30~0x40]").expect("parse");
        assert_eq!(r.count, Count::Fixed(10));
        assert_eq!(
            r.ranges,
            vec![ValueRange { low: 1, high: 0x20 }, ValueRange { low: 0x30, high: 0x40 }]
        );
    }

    #[test]
    fn range_spec_with_ranged_count_and_legacy_separator() {
        let r = parse_range_spec("f", "[2~5]:[0-9]").expect("parse");
        assert_eq!(r.count, Count::Range { low: 2, high: 5 });
        assert_eq!(r.ranges, vec![ValueRange { low: 0, high: 9 }]);
    }

    #[test]
    fn range_spec_degenerate_value() {
        let r = parse_range_spec("f", "3:0x41").expect("parse");
        assert_eq!(r.count, Count::Fixed(3));
        assert_eq!(r.ranges, vec![ValueRange { low: 0x41, high: 0x41 }]);
    }

    #[test]
    fn range_spec_missing_delimiter() {
        let err = parse_range_spec("f", "4:[0 15]").unwrap_err();
        match err {
            Error::Spec { tag, reason, .. } => {
                assert_eq!(tag, "f");
                assert!(reason.contains("delimiter"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn range_spec_rejects_inverted_range() {
        assert!(parse_range_spec("f", "1:[9~1]").is_err());
        assert!(parse_range_spec("f", "[1~x]:[1~2]").is_err());
        assert!(parse_range_spec("f", "1:").is_err());
    }

    #[test]
    fn function_spec_forms() {
        let f = parse_function_spec("f", "remaining_length:[a][ b ]").expect("parse");
        assert_eq!(f.name, "remaining_length");
        assert_eq!(f.args, vec!["a".to_string(), "b".to_string()]);
        let f = parse_function_spec("f", "now").expect("parse");
        assert!(f.args.is_empty());
        let f = parse_function_spec("f", "now:").expect("parse");
        assert!(f.args.is_empty());
        assert!(parse_function_spec("f", "1bad:[a]").is_err());
        assert!(parse_function_spec("f", "f:[]").is_err());
    }

    #[test]
    fn unescape_entities() {
        assert_eq!(unescape("a&lt;b&amp;&#x41;&#66;").expect("unescape"), "a<b&AB");
        assert!(unescape("&bogus;").is_err());
    }
}
