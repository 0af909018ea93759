//! Gmail commands.

use campusdesk_google::MailMessage;

use crate::cli::MailAction;
use crate::commands::App;
use crate::error::ClientResult;
use crate::output::{format_datetime, truncate};

pub async fn run(app: &App, action: MailAction) -> ClientResult<()> {
    let mail = app.mail();
    match action {
        MailAction::Inbox { limit } => {
            let result = mail.list_inbox(limit).await;
            app.printer.emit_listing(result, "messages", print_messages)
        }
        MailAction::Search { query, limit } => {
            let result = mail.search(&query, limit).await;
            app.printer.emit_listing(result, "messages", print_messages)
        }
        MailAction::Show { id } => {
            let result = mail.get_message(&id).await;
            app.printer.emit(result, print_message)
        }
    }
}

fn print_messages(messages: &[MailMessage]) {
    if messages.is_empty() {
        println!("No messages.");
        return;
    }
    for message in messages {
        let marker = if message.is_unread() { '*' } else { ' ' };
        let date = message.date.as_ref().map(format_datetime).unwrap_or_default();
        println!(
            "{marker} {:<16} {:<24} {:<50} {}",
            date,
            truncate(&message.from, 24),
            truncate(&message.subject, 50),
            message.id
        );
    }
}

fn print_message(message: &MailMessage) {
    println!("From:    {}", message.from);
    println!("To:      {}", message.to);
    if let Some(date) = &message.date {
        println!("Date:    {}", format_datetime(date));
    }
    println!("Subject: {}", message.subject);
    if !message.labels.is_empty() {
        println!("Labels:  {}", message.labels.join(", "));
    }
    println!();
    if message.body.is_empty() {
        println!("{}", message.snippet);
    } else {
        println!("{}", message.body);
    }
}
