//! Template rendering.
//!
//! Placeholders have the form `{{$name}}`, where `name` is the shortest run of
//! characters (excluding line breaks) up to the next `}}`. Rendering is a single
//! left-to-right pass: bound names are replaced by their value, unbound
//! placeholders are copied through unchanged, and replacement values are never
//! scanned again.

use crate::types::Variables;

const OPEN: &str = "{{$";
const CLOSE: &str = "}}";

/// A piece of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder { name: &'a str, raw: &'a str },
}

/// Iterator over the literal text and placeholders of a template.
#[derive(Debug)]
struct Segments<'a> {
    rest: &'a str,
    /// Offset into `rest` from which to look for the next opening.
    search_from: usize,
}

impl<'a> Segments<'a> {
    fn new(template: &'a str) -> Self {
        Self {
            rest: template,
            search_from: 0,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        loop {
            let Some(found) = self.rest[self.search_from..].find(OPEN) else {
                let text = self.rest;
                self.rest = "";
                self.search_from = 0;
                return Some(Segment::Text(text));
            };
            let start = self.search_from + found;
            let body = &self.rest[start + OPEN.len()..];

            let Some(end) = closing_offset(body) else {
                // Unterminated on this line; the opening is plain text.
                self.search_from = start + 1;
                continue;
            };

            if start > 0 {
                let text = &self.rest[..start];
                self.rest = &self.rest[start..];
                self.search_from = 0;
                return Some(Segment::Text(text));
            }

            let raw_len = OPEN.len() + end + CLOSE.len();
            let segment = Segment::Placeholder {
                name: &body[..end],
                raw: &self.rest[..raw_len],
            };
            self.rest = &self.rest[raw_len..];
            self.search_from = 0;
            return Some(segment);
        }
    }
}

/// Offset of the `}}` closing a placeholder body, if it closes on the same line.
fn closing_offset(body: &str) -> Option<usize> {
    let end = body.find(CLOSE)?;
    (!body[..end].contains('\n')).then_some(end)
}

/// Substitutes `variables` into `template`. Never fails.
///
/// # Example
/// ```
/// use spout_core::template::render;
/// use spout_core::Variables;
///
/// let mut vars = Variables::new();
/// vars.insert("name".into(), "World".into());
/// assert_eq!(render("Hello {{$name}}", &vars), "Hello World");
/// assert_eq!(render("Value: {{$missing}}", &vars), "Value: {{$missing}}");
/// ```
pub fn render(template: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(template.len());
    for segment in Segments::new(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder { name, raw } => match variables.get(name) {
                Some(value) => out.push_str(value),
                None => out.push_str(raw),
            },
        }
    }
    out
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for segment in Segments::new(template) {
        if let Segment::Placeholder { name, .. } = segment {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn substitutes_bound_variable() {
        assert_eq!(render("Hello {{$name}}", &vars(&[("name", "World")])), "Hello World");
    }

    #[test]
    fn leaves_unbound_placeholder() {
        assert_eq!(render("Value: {{$missing}}", &Variables::new()), "Value: {{$missing}}");
    }

    #[test]
    fn substitutes_multiple_and_repeated() {
        let rendered = render(
            "Translate {{$input}} {{$specification}}. Again: {{$input}}",
            &vars(&[("input", "Hello"), ("specification", "to Spanish")]),
        );
        assert_eq!(rendered, "Translate Hello to Spanish. Again: Hello");
    }

    #[test]
    fn replacement_is_not_rescanned() {
        let rendered = render(
            "{{$a}} {{$b}}",
            &vars(&[("a", "{{$b}}"), ("b", "second")]),
        );
        assert_eq!(rendered, "{{$b}} second");
    }

    #[test]
    fn ignores_other_brace_forms() {
        let template = "{{name}} {$name} {{ $name }} {{$name}";
        assert_eq!(render(template, &vars(&[("name", "x")])), template);
    }

    #[test]
    fn placeholder_does_not_span_lines() {
        let rendered = render("{{$a\n}} and {{$b}}", &vars(&[("a\n", "no"), ("b", "yes")]));
        assert_eq!(rendered, "{{$a\n}} and yes");
    }

    #[test]
    fn empty_name_passes_through() {
        assert_eq!(render("x{{$}}y", &Variables::new()), "x{{$}}y");
    }

    #[test]
    fn handles_multibyte_text() {
        let rendered = render("héllo {{$név}} — ✓", &vars(&[("név", "wörld")]));
        assert_eq!(rendered, "héllo wörld — ✓");
    }

    #[test]
    fn renders_empty_template() {
        assert_eq!(render("", &vars(&[("a", "b")])), "");
    }

    #[test]
    fn lists_placeholders_in_order() {
        let names = placeholders("{{$input}} {{$spec}} {{$input}} {{$}} {{plain}}");
        assert_eq!(names, vec!["input", "spec", ""]);
    }
}
