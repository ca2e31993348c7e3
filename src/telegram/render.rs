//! Outgoing message bodies and inline keyboards.
//!
//! The body is rendered through a `MarkupWriter`, one implementation per
//! Telegram dialect, so section structure lives in one place and only the
//! escaping and separators differ.

use serde_json::Value;

use crate::executions::Request;
use crate::i18n::{label_or, Messages};

use super::api::{InlineKeyboardButton, InlineKeyboardMarkup};
use super::handlers::{
    callback_data, ACTION_CANCEL_CUSTOM, ACTION_CUSTOM, ACTION_DELETE, ACTION_OPTION,
};
use super::markup::{escape_html, escape_markdown_v2, escape_markdown_v2_code};

/// Maximum button label length in code points.
const BUTTON_LABEL_MAX: usize = 42;

/// Structured rendering calls shared by both dialects.
trait MarkupWriter {
    fn bold(&mut self, text: &str);
    fn text(&mut self, text: &str);
    fn code(&mut self, text: &str);
    /// A fenced parameters block, including its leading separator.
    fn code_block(&mut self, text: &str);
    fn list_item(&mut self, number: usize, text: &str);
    fn line_break(&mut self);
    fn blank_line(&mut self);
    fn into_string(self) -> String;
}

#[derive(Default)]
struct MarkdownV2Writer {
    out: String,
}

impl MarkupWriter for MarkdownV2Writer {
    fn bold(&mut self, text: &str) {
        self.out.push('*');
        self.out.push_str(&escape_markdown_v2(text));
        self.out.push('*');
    }

    fn text(&mut self, text: &str) {
        self.out.push_str(&escape_markdown_v2(text));
    }

    fn code(&mut self, text: &str) {
        self.out.push('`');
        self.out.push_str(&escape_markdown_v2_code(text));
        self.out.push('`');
    }

    fn code_block(&mut self, text: &str) {
        self.out.push_str("\n\n```json\n");
        self.out.push_str(&escape_markdown_v2_code(text));
        self.out.push_str("\n```");
    }

    fn list_item(&mut self, number: usize, text: &str) {
        self.out.push_str(&format!("{}\\) ", number));
        self.out.push_str(&escape_markdown_v2(text));
    }

    fn line_break(&mut self) {
        self.out.push('\n');
    }

    fn blank_line(&mut self) {
        self.out.push_str("\n\n");
    }

    fn into_string(self) -> String {
        self.out
    }
}

#[derive(Default)]
struct HtmlWriter {
    out: String,
}

impl MarkupWriter for HtmlWriter {
    fn bold(&mut self, text: &str) {
        self.out.push_str("<b>");
        self.out.push_str(&escape_html(text));
        self.out.push_str("</b>");
    }

    fn text(&mut self, text: &str) {
        self.out.push_str(&escape_html(text));
    }

    fn code(&mut self, text: &str) {
        self.out.push_str("<code>");
        self.out.push_str(&escape_html(text));
        self.out.push_str("</code>");
    }

    fn code_block(&mut self, text: &str) {
        self.out.push_str("<br><pre><code>");
        self.out.push_str(&escape_html(text));
        self.out.push_str("</code></pre>");
    }

    fn list_item(&mut self, number: usize, text: &str) {
        self.out.push_str(&format!("{}) ", number));
        self.out.push_str(&escape_html(text));
    }

    fn line_break(&mut self) {
        self.out.push_str("<br>");
    }

    fn blank_line(&mut self) {
        self.out.push_str("<br><br>");
    }

    fn into_string(self) -> String {
        self.out
    }
}

/// Telegram parse mode for a request markup value.
pub fn parse_mode(markup: &str) -> &'static str {
    match markup.trim().to_lowercase().as_str() {
        "html" => "HTML",
        _ => "MarkdownV2",
    }
}

/// Render the anchor message body in the request's dialect.
pub fn render_message(msg: &Messages, req: &Request) -> String {
    let params = serde_json::to_string_pretty(&Value::Object(req.arguments.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    match req.markup.trim().to_lowercase().as_str() {
        "html" => write_body(HtmlWriter::default(), msg, req, &params),
        _ => write_body(MarkdownV2Writer::default(), msg, req, &params),
    }
}

fn write_body<W: MarkupWriter>(mut w: W, msg: &Messages, req: &Request, params: &str) -> String {
    let context_title = label_or(&msg.section_context, "Context");
    let action_title = label_or(&msg.section_action, "Action");
    let params_title = label_or(
        &msg.section_params,
        label_or(&msg.execution_params, "Parameters"),
    );
    let question_label = label_or(&msg.question_label, "Question");
    let context_label = label_or(&msg.context_label, "Context");
    let options_label = label_or(&msg.options_label, "Options");

    w.bold(&msg.execution_title);
    w.blank_line();

    w.bold(context_title);
    w.line_break();
    w.bold(&format!("{question_label}:"));
    w.text(" ");
    w.text(&req.question);
    w.line_break();
    if !req.context.trim().is_empty() {
        w.bold(&format!("{context_label}:"));
        w.text(" ");
        w.text(&req.context);
        w.line_break();
    }
    w.bold(&format!("{options_label}:"));
    w.line_break();
    for (idx, option) in req.options.iter().enumerate() {
        w.list_item(idx + 1, option);
        w.line_break();
    }
    w.line_break();

    w.bold(action_title);
    w.line_break();
    w.bold(&format!("{}:", msg.execution_tool));
    w.text(" ");
    w.code(&req.tool.name);
    w.line_break();
    w.bold(&format!("{}:", msg.execution_correlation));
    w.text(" ");
    w.code(&req.correlation_id);
    w.blank_line();

    w.bold(params_title);
    w.code_block(params);
    w.into_string()
}

/// Keyboard shown on the anchor message: one row per option, plus the
/// custom-answer row when allowed.
pub fn options_keyboard(msg: &Messages, req: &Request) -> InlineKeyboardMarkup {
    let mut rows = Vec::with_capacity(req.options.len() + 1);
    for (idx, option) in req.options.iter().enumerate() {
        let payload = format!("{}|{}", req.correlation_id, idx);
        rows.push(vec![InlineKeyboardButton {
            text: format!("{}. {}", idx + 1, shorten_button_label(option, BUTTON_LABEL_MAX)),
            callback_data: callback_data(ACTION_OPTION, &payload),
        }]);
    }
    if req.allow_custom {
        let mut label = req.custom_label.trim().to_string();
        if label.is_empty() {
            label = msg.custom_option_button.clone();
        }
        if label.is_empty() {
            label = "Custom option".to_string();
        }
        rows.push(vec![InlineKeyboardButton {
            text: label,
            callback_data: callback_data(ACTION_CUSTOM, &req.correlation_id),
        }]);
    }
    InlineKeyboardMarkup {
        inline_keyboard: rows,
    }
}

/// Keyboard attached to the custom-input prompt.
pub fn prompt_keyboard(msg: &Messages, correlation_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: msg.cancel_custom_button.clone(),
            callback_data: callback_data(ACTION_CANCEL_CUSTOM, correlation_id),
        }]],
    }
}

/// Keyboard replacing the options once the execution resolved.
pub fn resolved_keyboard(msg: &Messages, message_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![InlineKeyboardButton {
            text: msg.delete_button.clone(),
            callback_data: callback_data(ACTION_DELETE, &message_id.to_string()),
        }]],
    }
}

/// Truncate a button label to `max_chars` code points, marking longer values
/// with a `...` suffix.
pub fn shorten_button_label(value: &str, max_chars: usize) -> String {
    let value = value.trim();
    if value.is_empty() {
        return "-".to_string();
    }
    if max_chars == 0 {
        return value.to_string();
    }
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    if max_chars <= 3 {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}
