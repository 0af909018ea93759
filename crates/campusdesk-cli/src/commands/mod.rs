//! Subcommand implementations.

pub mod auth;
pub mod calendar;
pub mod classroom;
pub mod config;
pub mod drive;
pub mod mail;

use campusdesk_google::{CancellationToken, SessionContext};

use crate::output::Printer;

/// What every online command runs against.
#[derive(Debug)]
pub struct App {
    pub context: SessionContext,
    pub printer: Printer,
    /// Fired on Ctrl-C; client calls made through [`App`] stop with it.
    pub cancel: CancellationToken,
}

impl App {
    pub fn new(context: SessionContext, printer: Printer) -> Self {
        Self {
            context,
            printer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn mail(&self) -> campusdesk_google::MailClient {
        self.context.mail().scoped(self.cancel.clone())
    }

    pub fn drive(&self) -> campusdesk_google::DriveClient {
        self.context.drive().scoped(self.cancel.clone())
    }

    pub fn classroom(&self) -> campusdesk_google::ClassroomClient {
        self.context.classroom().scoped(self.cancel.clone())
    }

    pub fn calendar(&self) -> campusdesk_google::CalendarClient {
        self.context.calendar().scoped(self.cancel.clone())
    }
}
