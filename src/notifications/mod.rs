//! Notification side-channel for appointment events.
//!
//! Mail goes out only after the owning transaction has committed, on a
//! detached task. A delivery failure is logged and never surfaced to the
//! caller: the appointment record is the system of record, a missed email is
//! a degraded-but-acceptable outcome.

use anyhow::Result;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentEvent {
    Booked,
    Cancelled,
}

/// Everything needed to notify both parties about an appointment event
#[derive(Debug, Clone)]
pub struct AppointmentMail {
    pub event: AppointmentEvent,
    pub appointment_id: String,
    pub client_name: String,
    pub client_email: String,
    pub counselor_name: String,
    pub counselor_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl AppointmentMail {
    pub fn subject(&self) -> String {
        match self.event {
            AppointmentEvent::Booked => format!(
                "Session booked with {} on {}",
                self.counselor_name,
                self.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
            AppointmentEvent::Cancelled => format!(
                "Session on {} was cancelled",
                self.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
        }
    }

    fn headline(&self) -> &'static str {
        match self.event {
            AppointmentEvent::Booked => "Your session is booked",
            AppointmentEvent::Cancelled => "Your session was cancelled",
        }
    }

    pub fn render_text(&self) -> String {
        format!(
            "{}\n\nCounselor: {}\nClient: {}\nStarts: {}\nEnds: {}\n\n---\nHaven Counseling",
            self.headline(),
            self.counselor_name,
            self.client_name,
            self.start_time.format("%Y-%m-%d %H:%M UTC"),
            self.end_time.format("%Y-%m-%d %H:%M UTC"),
        )
    }

    pub fn render_html(&self) -> String {
        format!(
            r#"
            <!DOCTYPE html>
            <html>
            <head>
                <style>
                    body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
                    .container {{ max-width: 600px; margin: 0 auto; background-color: #ffffff; border-radius: 8px; overflow: hidden; }}
                    .header {{ background-color: #4f7b8f; color: white; padding: 20px; text-align: center; }}
                    .content {{ padding: 20px; }}
                    .field {{ margin-bottom: 12px; }}
                    .field-label {{ font-weight: bold; color: #666; }}
                    .footer {{ padding: 15px; text-align: center; color: #888; font-size: 12px; border-top: 1px solid #eee; }}
                </style>
            </head>
            <body>
                <div class="container">
                    <div class="header"><h1>{}</h1></div>
                    <div class="content">
                        <div class="field"><span class="field-label">Counselor:</span> {}</div>
                        <div class="field"><span class="field-label">Client:</span> {}</div>
                        <div class="field"><span class="field-label">Starts:</span> {}</div>
                        <div class="field"><span class="field-label">Ends:</span> {}</div>
                    </div>
                    <div class="footer">Haven Counseling</div>
                </div>
            </body>
            </html>
            "#,
            self.headline(),
            self.counselor_name,
            self.client_name,
            self.start_time.format("%Y-%m-%d %H:%M UTC"),
            self.end_time.format("%Y-%m-%d %H:%M UTC"),
        )
    }

    /// Calendar invite for booking confirmations
    pub fn render_ics(&self) -> String {
        let fmt = "%Y%m%dT%H%M%SZ";
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Haven//Counseling//EN\r\nBEGIN:VEVENT\r\nUID:{}@haven\r\nDTSTAMP:{}\r\nDTSTART:{}\r\nDTEND:{}\r\nSUMMARY:Counseling session with {}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            self.appointment_id,
            Utc::now().format(fmt),
            self.start_time.format(fmt),
            self.end_time.format(fmt),
            self.counselor_name,
        )
    }
}

/// Sends appointment mail over SMTP. With no SMTP host configured the
/// notifier is disabled and sends become debug-logged no-ops.
pub struct Notifier {
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_address: String,
}

impl Notifier {
    pub fn from_config(config: &SmtpConfig) -> Self {
        if config.host.is_empty() {
            return Self {
                mailer: None,
                from_address: config.from_address.clone(),
            };
        }

        let builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.host,
            ))
        };

        let mailer = match builder {
            Ok(builder) => {
                let builder = builder.port(config.port);
                let builder = if let (Some(username), Some(password)) =
                    (&config.username, &config.password)
                {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                } else {
                    builder
                };
                Some(builder.build())
            }
            Err(e) => {
                tracing::error!(error = %e, "Invalid SMTP configuration, notifications disabled");
                None
            }
        };

        Self {
            mailer,
            from_address: config.from_address.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mailer.is_some()
    }

    /// Send one message. `calendar` attaches an ICS invite when present.
    pub async fn send(
        &self,
        to: &str,
        subject: &str,
        text_body: String,
        html_body: String,
        calendar: Option<String>,
    ) -> Result<()> {
        let Some(mailer) = &self.mailer else {
            tracing::debug!(recipient = %to, "SMTP not configured, skipping notification");
            return Ok(());
        };

        let from: Mailbox = self.from_address.parse()?;
        let to_mailbox: Mailbox = to.parse()?;

        let alternative = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text_body),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html_body),
            );

        let body = match calendar {
            Some(ics) => MultiPart::mixed().multipart(alternative).singlepart(
                Attachment::new("invite.ics".to_string())
                    .body(ics, ContentType::parse("text/calendar")?),
            ),
            None => alternative,
        };

        let email = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .multipart(body)?;

        mailer.send(email).await?;
        Ok(())
    }
}

/// Fire booking/cancellation mail to both parties on a detached task.
///
/// Called strictly after the appointment transaction has committed; the
/// outcome never reaches the caller.
pub fn spawn_appointment_mails(notifier: Arc<Notifier>, mail: AppointmentMail) {
    tokio::spawn(async move {
        let subject = mail.subject();
        let calendar = match mail.event {
            AppointmentEvent::Booked => Some(mail.render_ics()),
            AppointmentEvent::Cancelled => None,
        };

        let recipients = [mail.client_email.clone(), mail.counselor_email.clone()];
        for recipient in recipients {
            if let Err(e) = notifier
                .send(
                    &recipient,
                    &subject,
                    mail.render_text(),
                    mail.render_html(),
                    calendar.clone(),
                )
                .await
            {
                tracing::error!(
                    recipient = %recipient,
                    appointment_id = %mail.appointment_id,
                    error = %e,
                    "Failed to send appointment notification"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mail(event: AppointmentEvent) -> AppointmentMail {
        AppointmentMail {
            event,
            appointment_id: "a1".to_string(),
            client_name: "Jordan".to_string(),
            client_email: "jordan@example.com".to_string(),
            counselor_name: "Dana Reeve".to_string(),
            counselor_email: "dana@example.com".to_string(),
            start_time: Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 3, 9, 11, 0, 0).unwrap(),
        }
    }

    #[test]
    fn subjects_name_the_event() {
        assert!(mail(AppointmentEvent::Booked).subject().contains("booked"));
        assert!(mail(AppointmentEvent::Cancelled)
            .subject()
            .contains("cancelled"));
    }

    #[test]
    fn ics_carries_the_appointment_window() {
        let ics = mail(AppointmentEvent::Booked).render_ics();
        assert!(ics.contains("DTSTART:20260309T100000Z"));
        assert!(ics.contains("DTEND:20260309T110000Z"));
        assert!(ics.contains("UID:a1@haven"));
    }

    #[test]
    fn disabled_notifier_skips_without_error() {
        let notifier = Notifier::from_config(&SmtpConfig::default());
        assert!(!notifier.is_enabled());

        let result = tokio_test::block_on(notifier.send(
            "someone@example.com",
            "subject",
            "text".to_string(),
            "<p>html</p>".to_string(),
            None,
        ));
        assert!(result.is_ok());
    }
}
