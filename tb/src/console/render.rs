//! Text rendering for replies, costs and status

use colored::Colorize;

use crate::correlation::ReplyOutcome;
use crate::domain::{Reply, ResponderType};
use crate::router::Route;
use crate::system::SystemStatus;

const PANEL_WIDTH: usize = 60;

fn panel_title(title: &str) -> String {
    let fill = PANEL_WIDTH.saturating_sub(title.chars().count() + 4);
    format!("── {title} {}", "─".repeat(fill))
}

fn panel_end() -> String {
    "─".repeat(PANEL_WIDTH)
}

/// Heading used for a responder's answer
pub fn answer_title(responder: ResponderType) -> &'static str {
    match responder {
        ResponderType::ChineseTeacher => "Chinese Teacher Answer",
        ResponderType::EnglishTeacher => "English Teacher Answer",
    }
}

/// Answer panel plus cost table for a reply
pub fn render_reply(reply: &Reply) -> String {
    if !reply.success {
        return render_error(&reply.content);
    }

    let mut lines = vec![
        panel_title(answer_title(reply.agent_type)).green().to_string(),
        reply.content.clone(),
        panel_end().green().to_string(),
    ];
    lines.push(render_cost_table(reply));
    lines.join("\n")
}

/// Cost table for a reply
pub fn render_cost_table(reply: &Reply) -> String {
    let cost = &reply.cost_info;
    let rows = [
        ("Input tokens", cost.input_tokens.to_string()),
        ("Output tokens", cost.output_tokens.to_string()),
        ("Total cost", format!("${:.6}", cost.cost_usd)),
        ("Model", cost.model_name.clone()),
        ("Response time", format!("{:.2}s", reply.response_time)),
    ];

    let mut lines = vec![panel_title("Cost Information").blue().to_string()];
    for (item, value) in rows {
        lines.push(format!("  {}{}", format!("{item:<16}").cyan(), value));
    }
    lines.push(panel_end().blue().to_string());
    lines.join("\n")
}

pub fn render_error(message: &str) -> String {
    [
        panel_title("Error").red().to_string(),
        message.to_string(),
        panel_end().red().to_string(),
    ]
    .join("\n")
}

/// Render any outcome of waiting for a reply
pub fn render_outcome(outcome: &ReplyOutcome) -> String {
    match outcome {
        ReplyOutcome::Answered(reply) => render_reply(reply),
        ReplyOutcome::TimedOut { waited } => render_error(&format!("Response timeout after {}s", waited.as_secs())),
        ReplyOutcome::Cancelled => render_error("Request cancelled: system shutting down"),
        ReplyOutcome::SendFailed { error } => render_error(&format!("Send failed: {error}")),
    }
}

pub fn render_route(route: &Route) -> String {
    format!("language: {}\nchannel:  {}", route.language, route.channel)
}

pub fn render_status(status: &SystemStatus) -> String {
    let connected = if status.bus_connected {
        "connected".green()
    } else {
        "disconnected".red()
    };
    let consumers = if status.active_consumers.is_empty() {
        "none".to_string()
    } else {
        status.active_consumers.join(", ")
    };

    [
        panel_title("System Status").cyan().to_string(),
        format!("  {:<20}{}", "Bus", connected),
        format!("  {:<20}{}", "Active consumers", consumers),
        format!("  {:<20}{}", "Messages processed", status.total_messages_processed),
        format!("  {:<20}${:.6}", "Total cost", status.total_cost),
        format!("  {:<20}{:.0}s", "Uptime", status.uptime_seconds),
        panel_end().cyan().to_string(),
    ]
    .join("\n")
}
