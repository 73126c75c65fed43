use once_cell::sync::Lazy;
use regex::Regex;

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").unwrap());

/// A run of text under one heading context.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Heading stack joined with " > "; `None` before the first heading.
    pub path: Option<String>,
    /// The heading line itself, when this section opened with one.
    pub heading: Option<String>,
    pub body: String,
}

/// Tracks the heading stack across a document's blocks so every chunk gets
/// the section path it sits under. Markdown-style `#` headings adjust the
/// stack by level.
#[derive(Debug, Default)]
pub struct SectionTracker {
    stack: Vec<(usize, String)>,
}

impl SectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current path, the ordered headings joined with " > ".
    pub fn current_path(&self) -> Option<String> {
        if self.stack.is_empty() {
            None
        } else {
            Some(
                self.stack
                    .iter()
                    .map(|(_, title)| title.as_str())
                    .collect::<Vec<_>>()
                    .join(" > "),
            )
        }
    }

    fn observe_heading(&mut self, level: usize, title: &str) {
        while self
            .stack
            .last()
            .is_some_and(|(prev_level, _)| *prev_level >= level)
        {
            self.stack.pop();
        }
        self.stack.push((level, title.to_string()));
    }

    /// Split a text block into sections, advancing the heading context.
    pub fn split(&mut self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut heading: Option<String> = None;
        let mut body = String::new();
        let mut path = self.current_path();

        let mut flush =
            |sections: &mut Vec<Section>, path: &Option<String>, heading: &mut Option<String>, body: &mut String| {
                if !body.trim().is_empty() || heading.is_some() {
                    sections.push(Section {
                        path: path.clone(),
                        heading: heading.take(),
                        body: std::mem::take(body).trim().to_string(),
                    });
                } else {
                    body.clear();
                }
            };

        for line in text.lines() {
            if let Some(caps) = HEADING.captures(line) {
                flush(&mut sections, &path, &mut heading, &mut body);
                let level = caps[1].len();
                let title = caps[2].to_string();
                self.observe_heading(level, &title);
                path = self.current_path();
                heading = Some(line.trim().to_string());
            } else {
                body.push_str(line);
                body.push('\n');
            }
        }
        flush(&mut sections, &path, &mut heading, &mut body);

        sections
    }
}
