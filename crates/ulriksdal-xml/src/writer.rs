#![forbid(unsafe_code)]

//! Small XML writer used to serialize signature and encryption elements.

/// Builds XML text element by element, escaping text and attribute values.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an element with the given name and attributes.
    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.open_tag(name, attrs);
        self.out.push('>');
    }

    /// Write an empty element (self-closing).
    pub fn empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.open_tag(name, attrs);
        self.out.push_str("/>");
    }

    pub fn end_element(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    /// `<name attrs>text</name>` in one call.
    pub fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) {
        self.start_element(name, attrs);
        self.write_text(text);
        self.end_element(name);
    }

    /// Write escaped text content.
    pub fn write_text(&mut self, text: &str) {
        self.out.push_str(&escape_text(text));
    }

    /// Write an already-serialized fragment verbatim.
    pub fn write_raw(&mut self, xml: &str) {
        self.out.push_str(xml);
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn open_tag(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.out.push('<');
        self.out.push_str(name);
        for (k, v) in attrs {
            self.out.push(' ');
            self.out.push_str(k);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attr(v));
            self.out.push('"');
        }
    }
}

/// Escape element content for serialization.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape an attribute value for serialization inside double quotes.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_nesting() {
        let mut w = XmlWriter::new();
        w.start_element("a", &[("xmlns", "urn:a"), ("v", "x\"y")]);
        w.text_element("b", &[], "1 < 2");
        w.empty_element("c", &[]);
        w.end_element("a");
        assert_eq!(
            w.into_string(),
            r#"<a xmlns="urn:a" v="x&quot;y"><b>1 &lt; 2</b><c/></a>"#
        );
    }
}
