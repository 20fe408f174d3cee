//! Markup primitives: escaping and a tiny element builder.
//!
//! Every piece of free text and every attribute value that reaches the prompt
//! passes through [`escape_xml`]. Message content is attacker-controlled;
//! an unescaped `</chat_log>` inside a message would let a user rewrite the
//! prompt structure.

use std::borrow::Cow;

/// Escape `& < > " '` for use in element text or attribute values.
pub fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Wrap already-rendered content in a block element, one tag per line.
///
/// Returns an empty string when `inner` is empty so absent sections vanish.
pub fn block(name: &str, inner: &str) -> String {
    if inner.is_empty() {
        return String::new();
    }
    format!("<{name}>\n{inner}\n</{name}>")
}

/// Builder for a single element with attributes, text, and child elements.
///
/// ```text
/// <name a="1" b="2">text</name>            (no children)
/// <name a="1">text
/// <child/>
/// </name>                                  (with children)
/// <name a="1"/>                            (empty)
/// ```
#[derive(Debug, Clone)]
pub struct Element {
    name: &'static str,
    attrs: Vec<(&'static str, String)>,
    text: String,
    children: Vec<String>,
}

impl Element {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Add an attribute; the value is escaped.
    pub fn attr(mut self, key: &'static str, value: impl AsRef<str>) -> Self {
        self.attrs.push((key, escape_xml(value.as_ref()).into_owned()));
        self
    }

    /// Add an attribute only when a value is present.
    pub fn attr_opt<S: AsRef<str>>(self, key: &'static str, value: Option<S>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    /// Set the text body; escaped.
    pub fn text(mut self, text: &str) -> Self {
        self.text = escape_xml(text).into_owned();
        self
    }

    /// Append an already-rendered child element.
    pub fn child(mut self, rendered: String) -> Self {
        if !rendered.is_empty() {
            self.children.push(rendered);
        }
        self
    }

    /// Just the start tag, for wrappers whose body is built elsewhere.
    pub fn open_tag(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 2);
        self.write_start(&mut out);
        out.push('>');
        out
    }

    fn write_start(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(v);
            out.push('"');
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.name.len() * 2
                + self.text.len()
                + self.children.iter().map(String::len).sum::<usize>()
                + 32,
        );
        self.write_start(&mut out);

        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return out;
        }

        out.push('>');
        out.push_str(&self.text);
        if !self.children.is_empty() {
            for child in &self.children {
                out.push('\n');
                out.push_str(child);
            }
            out.push('\n');
        }
        out.push_str("</");
        out.push_str(self.name);
        out.push('>');
        out
    }
}
