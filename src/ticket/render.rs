//! Ticket rendering: one turn in, two encodings out. No I/O.

use chrono::NaiveDateTime;

use crate::config::TicketConfig;
use crate::model::{Module, PriorityReason, Turn};

const WAIT_INSTRUCTION: &str = "Por favor espere el llamado en pantalla";
const PRIORITY_MARKER: &str = "* TURNO PREFERENCIAL *";

/// Both encodings of one ticket. Immutable once rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketArtifact {
    /// Fixed-width text for thermal sinks.
    pub text: String,
    /// Self-contained HTML document for browser-native print surfaces.
    pub structured: String,
}

/// The ticket's content, resolved once and laid out twice.
struct TicketFields<'a> {
    facility: &'a str,
    tagline: &'a str,
    module_label: &'static str,
    number: &'a str,
    priority: Option<Option<&'a str>>,
    patient: Option<String>,
    printed_at: String,
}

#[derive(Debug, Clone)]
pub struct TicketRenderer {
    facility_name: String,
    facility_tagline: String,
    width: usize,
}

impl Default for TicketRenderer {
    fn default() -> Self {
        Self::new(&TicketConfig::default())
    }
}

impl TicketRenderer {
    pub fn new(config: &TicketConfig) -> Self {
        Self {
            facility_name: config.facility_name.clone(),
            facility_tagline: config.facility_tagline.clone(),
            width: config.width.max(16),
        }
    }

    /// Render `turn`. `module_override` replaces the turn's own module in
    /// the label line (the kiosk passes the service the patient picked).
    pub fn render(
        &self,
        turn: &Turn,
        module_override: Option<Module>,
        printed_at: NaiveDateTime,
    ) -> TicketArtifact {
        let fields = TicketFields {
            facility: &self.facility_name,
            tagline: &self.facility_tagline,
            module_label: module_override.unwrap_or(turn.module).ticket_label(),
            number: turn.number.as_str(),
            priority: turn.priority.as_ref().map(|reason| match reason {
                PriorityReason::Unspecified => None,
                reason => Some(reason.label()),
            }),
            patient: turn.display_name(),
            printed_at: printed_at.format("%d/%m/%Y - %H:%M").to_string(),
        };
        TicketArtifact {
            text: self.render_text(&fields),
            structured: render_html(&fields),
        }
    }

    fn render_text(&self, fields: &TicketFields<'_>) -> String {
        let rule = "-".repeat(self.width);
        let mut lines = Vec::new();

        lines.push(self.center(fields.facility));
        lines.extend(self.wrap_centered(fields.tagline));
        lines.push(rule.clone());
        lines.push(self.center(fields.module_label));
        lines.push(String::new());
        lines.push(self.center(&format!("TURNO {}", fields.number)));
        lines.push(String::new());
        if let Some(reason) = fields.priority {
            lines.push(self.center(PRIORITY_MARKER));
            if let Some(reason) = reason {
                lines.push(self.center(&format!("({reason})")));
            }
        }
        if let Some(name) = &fields.patient {
            lines.extend(self.wrap_centered(name));
        }
        lines.push(rule);
        lines.push(self.center(&fields.printed_at));
        lines.extend(self.wrap_centered(WAIT_INSTRUCTION));

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    fn center(&self, line: &str) -> String {
        let len = line.chars().count();
        if len >= self.width {
            return line.to_string();
        }
        let pad = (self.width - len) / 2;
        format!("{}{line}", " ".repeat(pad))
    }

    /// Greedy word wrap to the ticket width, each line centered.
    fn wrap_centered(&self, text: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            let needed = current.chars().count() + word.chars().count() + 1;
            if !current.is_empty() && needed > self.width {
                lines.push(self.center(&current));
                current.clear();
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(self.center(&current));
        }
        lines
    }
}

fn render_html(fields: &TicketFields<'_>) -> String {
    let mut body = String::new();
    push_div(&mut body, "facility", fields.facility);
    push_div(&mut body, "tagline", fields.tagline);
    body.push_str("<hr>\n");
    push_div(&mut body, "module", fields.module_label);
    push_div(&mut body, "number", &format!("TURNO {}", fields.number));
    if let Some(reason) = fields.priority {
        push_div(&mut body, "priority", PRIORITY_MARKER);
        if let Some(reason) = reason {
            push_div(&mut body, "reason", &format!("({reason})"));
        }
    }
    if let Some(name) = &fields.patient {
        push_div(&mut body, "patient", name);
    }
    body.push_str("<hr>\n");
    push_div(&mut body, "printed-at", &fields.printed_at);
    push_div(&mut body, "instruction", WAIT_INSTRUCTION);

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        title = escape_html(&format!("Turno {}", fields.number)),
    )
}

const STYLE: &str = "\
@page { size: 80mm auto; margin: 0; }
body { width: 72mm; margin: 0 auto; font-family: monospace; text-align: center; }
.facility { font-size: 20px; font-weight: bold; }
.tagline { font-size: 11px; }
.module { font-size: 14px; font-weight: bold; margin-top: 6px; }
.number { font-size: 44px; font-weight: bold; margin: 10px 0; }
.priority { font-size: 14px; font-weight: bold; }
.patient { font-size: 13px; margin-top: 4px; }
.printed-at, .instruction { font-size: 11px; }
";

fn push_div(out: &mut String, class: &str, content: &str) {
    out.push_str(&format!(
        "<div class=\"{class}\">{}</div>\n",
        escape_html(content)
    ));
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
