use crate::config::EmailConfig;
use crate::errors::{ServiceError, ServiceResult};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::str::FromStr;

pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    config: EmailConfig,
}

impl EmailService {
    /// Creates a new EmailService instance
    pub fn new(config: EmailConfig) -> ServiceResult<Self> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| ServiceError::validation(format!("Invalid SMTP host: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, config })
    }

    /// Link that confirms an email address without signing in.
    pub fn confirmation_link(&self, token: &str, code: &str) -> String {
        format!(
            "{}/auth/email/confirm-link?token={}&code={}",
            self.config.base_url, token, code
        )
    }

    /// Sends the verification code together with its one-click link
    pub async fn send_verification_email(
        &self,
        recipient_email: &str,
        code: &str,
        confirm_url: &str,
        valid_minutes: i64,
    ) -> ServiceResult<()> {
        let subject = "Confirm your email address";

        let html_content = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <head>
                <meta charset="UTF-8">
                <title>{subject}</title>
            </head>
            <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
                <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
                    <h2 style="color: #2c3e50;">Confirm your email</h2>

                    <p>Your verification code is:</p>
                    <p style="font-size: 24px; letter-spacing: 4px;"><strong>{code}</strong></p>

                    <p>Or confirm directly with the button below:</p>

                    <div style="text-align: center; margin: 30px 0;">
                        <a href="{confirm_url}"
                           style="background-color: #3498db; color: white; padding: 12px 30px;
                                  text-decoration: none; border-radius: 5px; display: inline-block;">
                            Confirm Email
                        </a>
                    </div>

                    <p style="font-size: 12px; color: #7f8c8d;">
                        This code expires in {valid_minutes} minutes. If you did not request it,
                        you can safely ignore this email.
                    </p>
                </div>
            </body>
            </html>
            "#
        );

        let text_content = format!(
            r#"Confirm your email

Your verification code is: {code}

Or open this link to confirm:
{confirm_url}

This code expires in {valid_minutes} minutes. If you did not request it, you can safely ignore this email.
            "#
        );

        self.send_email(recipient_email, subject, &html_content, &text_content)
            .await
    }

    /// Sends a password reset code
    pub async fn send_password_reset_email(
        &self,
        recipient_email: &str,
        code: &str,
        valid_minutes: i64,
    ) -> ServiceResult<()> {
        let subject = "Your password reset code";

        let html_content = format!(
            r#"
            <!DOCTYPE html>
            <html>
            <head>
                <meta charset="UTF-8">
                <title>{subject}</title>
            </head>
            <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
                <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
                    <h2 style="color: #2c3e50;">Reset your password</h2>
                    <p>Use this code to choose a new password:</p>
                    <p style="font-size: 24px; letter-spacing: 4px;"><strong>{code}</strong></p>
                    <p style="font-size: 12px; color: #7f8c8d;">
                        The code expires in {valid_minutes} minutes. All signed-in sessions end
                        once the password is changed.
                    </p>
                </div>
            </body>
            </html>
            "#
        );

        let text_content = format!(
            r#"Reset your password

Use this code to choose a new password: {code}

The code expires in {valid_minutes} minutes. All signed-in sessions end once the password is changed.
            "#
        );

        self.send_email(recipient_email, subject, &html_content, &text_content)
            .await
    }

    /// Sends a generic email
    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> ServiceResult<()> {
        let from_mailbox = Mailbox::from_str(&format!(
            "{} <{}>",
            self.config.from_name, self.config.from_email
        ))
        .map_err(|e| ServiceError::validation(format!("Invalid from email: {e}")))?;

        let to_mailbox = Mailbox::from_str(to_email)
            .map_err(|e| ServiceError::validation(format!("Invalid recipient email: {e}")))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_content.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_content.to_string()),
                    ),
            )
            .map_err(|e| ServiceError::internal_error(format!("Failed to build email: {e}")))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| ServiceError::external_service(format!("Failed to send email: {e}")))?;

        Ok(())
    }
}
