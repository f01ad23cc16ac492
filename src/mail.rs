//! Outbound email.
//!
//! `SendGridMailer` posts to a SendGrid v3 compatible endpoint. Without an API
//! key the server runs with `LogMailer`, which only logs what would be sent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::MailConfig;
use crate::db::models::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail API rejected message with status {0}: {1}")]
    Rejected(u16, String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

pub struct SendGridMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_email: String,
}

impl SendGridMailer {
    pub fn new(api_url: String, api_key: String, from_email: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from_email,
        }
    }

    fn payload(&self, email: &Email) -> serde_json::Value {
        let mut payload = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_email },
            "subject": email.subject,
            "content": [{ "type": "text/plain", "value": email.body }],
        });
        if let Some(reply_to) = &email.reply_to {
            payload["reply_to"] = json!({ "email": reply_to });
        }
        payload
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.payload(email))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected(status.as_u16(), body));
        }
        tracing::info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.body,
            "email delivery disabled, logging message"
        );
        Ok(())
    }
}

pub fn build_mailer(config: &MailConfig) -> Arc<dyn Mailer> {
    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Arc::new(SendGridMailer::new(
            config.api_url.clone(),
            key.to_string(),
            config.from_email.clone(),
        )),
        None => {
            tracing::warn!("No mail API key configured, emails will only be logged");
            Arc::new(LogMailer)
        }
    }
}

/// Absolute link to the credential verification endpoint under `public_url`.
pub fn verification_link(public_url: &str, credential_id: &str) -> Result<String, url::ParseError> {
    let base = url::Url::parse(&format!("{}/", public_url.trim_end_matches('/')))?;
    let link = base.join(&format!("api/accounts/credentials/{}/verify/", credential_id))?;
    Ok(link.to_string())
}

pub fn verification_email(user: &User, verification_url: &str) -> Email {
    let name = if user.first_name.is_empty() {
        user.email.as_str()
    } else {
        user.first_name.as_str()
    };
    Email {
        to: user.email.clone(),
        subject: "Verify your account".to_string(),
        body: format!(
            "Hi {},\n\nConfirm your email address by opening this link:\n\n{}\n",
            name, verification_url
        ),
        reply_to: None,
    }
}

/// Fields of a contact form submission.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ContactMessage {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub alt_email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

pub fn contact_email(sender: &User, contact: &ContactMessage, to: &str) -> Email {
    let mut body = format!(
        "From: {} {} <{}>\n",
        sender.first_name, sender.last_name, sender.email
    );
    if let Some(alt) = contact.alt_email.as_deref().filter(|s| !s.is_empty()) {
        body.push_str(&format!("Alternate email: {}\n", alt));
    }
    if let Some(phone) = contact.phone.as_deref().filter(|s| !s.is_empty()) {
        body.push_str(&format!("Phone: {}\n", phone));
    }
    body.push('\n');
    body.push_str(&contact.message);

    Email {
        to: to.to_string(),
        subject: format!("[Contact] {}", contact.subject),
        body,
        reply_to: Some(sender.email.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Author,
            is_active: true,
            is_staff: false,
            is_superuser: false,
            img_url: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn verification_link_keeps_base_path() {
        assert_eq!(
            verification_link("http://localhost:8000", "c1").unwrap(),
            "http://localhost:8000/api/accounts/credentials/c1/verify/"
        );
        assert_eq!(
            verification_link("https://blog.example.com/backend/", "c2").unwrap(),
            "https://blog.example.com/backend/api/accounts/credentials/c2/verify/"
        );
        assert!(verification_link("not a url", "c3").is_err());
    }

    #[test]
    fn verification_email_carries_link() {
        let email = verification_email(&user(), "http://localhost:8000/api/accounts/credentials/c1/verify/");
        assert_eq!(email.to, "ada@example.com");
        assert!(email.body.contains("Hi Ada"));
        assert!(email.body.contains("/credentials/c1/verify/"));
    }

    #[test]
    fn contact_email_includes_optional_fields() {
        let contact = ContactMessage {
            subject: "Hello".to_string(),
            message: "Nice blog".to_string(),
            alt_email: Some("alt@example.com".to_string()),
            phone: None,
        };
        let email = contact_email(&user(), &contact, "team@example.com");
        assert_eq!(email.to, "team@example.com");
        assert_eq!(email.subject, "[Contact] Hello");
        assert_eq!(email.reply_to.as_deref(), Some("ada@example.com"));
        assert!(email.body.contains("Alternate email: alt@example.com"));
        assert!(!email.body.contains("Phone:"));
        assert!(email.body.ends_with("Nice blog"));
    }

    #[test]
    fn sendgrid_payload_shape() {
        let mailer = SendGridMailer::new(
            "http://127.0.0.1:9/send".to_string(),
            "key".to_string(),
            "no-reply@example.com".to_string(),
        );
        let email = Email {
            to: "a@x.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            reply_to: Some("r@x.com".to_string()),
        };
        let payload = mailer.payload(&email);
        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "a@x.com");
        assert_eq!(payload["from"]["email"], "no-reply@example.com");
        assert_eq!(payload["content"][0]["value"], "b");
        assert_eq!(payload["reply_to"]["email"], "r@x.com");
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let email = verification_email(&user(), "http://x/verify/");
        assert!(LogMailer.send(&email).await.is_ok());
    }
}
