use serde_json::{Map, Value};

const SNIPPET_CHARS: usize = 120;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("payload.{0} is required")]
pub struct PayloadError(pub &'static str);

/// A rendered email: intro lines, an optional call to action, outro lines.
#[derive(Clone, Debug, PartialEq)]
pub struct MailMessage {
    pub subject: String,
    pub lines: Vec<String>,
    pub action: Option<(String, String)>,
    pub outro: Vec<String>,
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl MailMessage {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push_str("\n\n");
        }
        if let Some((label, url)) = &self.action {
            out.push_str(&format!("{label}: {url}\n\n"));
        }
        for line in &self.outro {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn render_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html>\n<html>\n<body>\n");
        for line in &self.lines {
            out.push_str(&format!("<p>{}</p>\n", escape_html(line)));
        }
        if let Some((label, url)) = &self.action {
            out.push_str(&format!(
                "<p><a href=\"{}\">{}</a></p>\n",
                escape_html(url),
                escape_html(label)
            ));
        }
        for line in &self.outro {
            out.push_str(&format!("<p>{}</p>\n", escape_html(line)));
        }
        out.push_str("</body>\n</html>\n");
        out
    }
}

/// Strings and numbers both render as their plain text.
fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Cuts `s` to `limit` characters, appending `...` when anything was cut.
pub fn snippet(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let cut: String = s.chars().take(limit).collect();
    format!("{}...", cut.trim_end())
}

fn task_link(dashboard_url: &str, task_id: &str) -> String {
    format!("{}/tasks/{task_id}/edit", dashboard_url.trim_end_matches('/'))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThreadUpdated {
    pub task_id: String,
    pub task_title: Option<String>,
    pub thread_type: String,
    pub content: String,
    pub sender_name: Option<String>,
    pub url: String,
}

impl ThreadUpdated {
    pub fn from_payload(
        payload: &Map<String, Value>,
        dashboard_url: &str,
    ) -> Result<Self, PayloadError> {
        let task_id = text(payload, "task_id").ok_or(PayloadError("task_id"))?;
        Ok(ThreadUpdated {
            url: task_link(dashboard_url, &task_id),
            task_title: text(payload, "task_title"),
            thread_type: text(payload, "type").unwrap_or_else(|| "external".into()),
            content: text(payload, "content").unwrap_or_default(),
            sender_name: text(payload, "sender_name"),
            task_id,
        })
    }

    fn to_mail(&self) -> MailMessage {
        let title = self
            .task_title
            .clone()
            .unwrap_or_else(|| format!("Task #{}", self.task_id));
        let intro = match &self.sender_name {
            Some(sender) => format!("{sender} posted a new message."),
            None => "A new message was posted.".to_string(),
        };

        MailMessage {
            subject: format!(
                "New reply in {} thread for {title}",
                ucfirst(&self.thread_type)
            ),
            lines: vec![
                intro,
                format!("Preview: \"{}\"", snippet(&self.content, SNIPPET_CHARS)),
            ],
            action: Some(("View Thread".into(), self.url.clone())),
            outro: vec!["Please do not reply to this email directly.".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskCreated {
    pub task_id: String,
    pub task_title: Option<String>,
    pub task_description: Option<String>,
    pub task_status: Option<String>,
    pub task_priority: Option<String>,
    pub url: String,
}

impl TaskCreated {
    pub fn from_payload(
        payload: &Map<String, Value>,
        dashboard_url: &str,
    ) -> Result<Self, PayloadError> {
        let task_id = text(payload, "task_id").ok_or(PayloadError("task_id"))?;
        Ok(TaskCreated {
            url: task_link(dashboard_url, &task_id),
            task_title: text(payload, "task_title"),
            task_description: text(payload, "task_description"),
            task_status: text(payload, "task_status"),
            task_priority: text(payload, "task_priority"),
            task_id,
        })
    }

    fn to_mail(&self) -> MailMessage {
        let title = self
            .task_title
            .clone()
            .unwrap_or_else(|| format!("Task #{}", self.task_id));
        let status = ucfirst(self.task_status.as_deref().unwrap_or("pending"));
        let priority = ucfirst(self.task_priority.as_deref().unwrap_or("medium"));

        let mut lines = vec![
            "A new task has been created and you have been granted access.".to_string(),
            format!("Task Title: {title}"),
            format!("Priority: {priority}"),
            format!("Status: {status}"),
        ];
        if let Some(description) = &self.task_description {
            lines.push(format!("Description: {description}"));
        }

        MailMessage {
            subject: format!("New Task Created: {title}"),
            lines,
            action: Some(("View Task".into(), self.url.clone())),
            outro: vec!["Please do not reply to this email directly.".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    ThreadUpdated(ThreadUpdated),
    TaskCreated(TaskCreated),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ThreadUpdated(_) => "thread_updated",
            Notification::TaskCreated(_) => "task_created",
        }
    }

    pub fn to_mail(&self) -> MailMessage {
        match self {
            Notification::ThreadUpdated(n) => n.to_mail(),
            Notification::TaskCreated(n) => n.to_mail(),
        }
    }
}
