//! Email messages sent to customers and administrators.

use serde::Serialize;

use super::payment::ManualPayment;

/// Outbound email
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Render kobo as a naira string, e.g. `₦5,000.00`.
#[must_use]
pub fn format_naira(kobo: i64) -> String {
    let sign = if kobo < 0 { "-" } else { "" };
    let abs = kobo.unsigned_abs();
    let whole = (abs / 100).to_string();
    let fraction = abs % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}₦{grouped}.{fraction:02}")
}

impl EmailMessage {
    pub fn deposit_received(to: &str, name: &str, amount_kobo: i64, balance_kobo: i64) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Wallet funded: {}", format_naira(amount_kobo)),
            html: format!(
                "<p>Hi {name},</p><p>Your wallet has been credited with <b>{}</b>. \
                 Your new balance is <b>{}</b>.</p>",
                format_naira(amount_kobo),
                format_naira(balance_kobo)
            ),
        }
    }

    pub fn manual_payment_submitted(admin: &str, payment: &ManualPayment) -> Self {
        Self {
            to: admin.to_string(),
            subject: format!(
                "Manual payment awaiting review: {}",
                format_naira(payment.amount_kobo)
            ),
            html: format!(
                "<p>Payment <code>{}</code> from user <code>{}</code> ({}) needs review.</p>\
                 <p>Receipt: <a href=\"{url}\">{url}</a></p>",
                payment.id,
                payment.user_id,
                payment.sender_name,
                url = payment.receipt_url
            ),
        }
    }

    pub fn manual_payment_approved(to: &str, name: &str, amount_kobo: i64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your payment has been approved".to_string(),
            html: format!(
                "<p>Hi {name},</p><p>Your manual payment of <b>{}</b> was approved \
                 and added to your wallet.</p>",
                format_naira(amount_kobo)
            ),
        }
    }

    pub fn manual_payment_rejected(to: &str, name: &str, amount_kobo: i64, reason: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your payment could not be verified".to_string(),
            html: format!(
                "<p>Hi {name},</p><p>Your manual payment of <b>{}</b> was rejected.</p>\
                 <p>Reason: {reason}</p>",
                format_naira(amount_kobo)
            ),
        }
    }

    pub fn referral_bonus_earned(to: &str, name: &str, amount_kobo: i64) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("You earned a {} referral bonus", format_naira(amount_kobo)),
            html: format!(
                "<p>Hi {name},</p><p>Someone you referred just qualified. \
                 <b>{}</b> has been added to your wallet.</p>",
                format_naira(amount_kobo)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_naira() {
        assert_eq!(format_naira(0), "₦0.00");
        assert_eq!(format_naira(5), "₦0.05");
        assert_eq!(format_naira(50_000), "₦500.00");
        assert_eq!(format_naira(500_000), "₦5,000.00");
        assert_eq!(format_naira(123_456_789), "₦1,234,567.89");
        assert_eq!(format_naira(-45_000), "-₦450.00");
    }

    #[test]
    fn test_deposit_received_mentions_amounts() {
        let msg = EmailMessage::deposit_received("ada@example.com", "Ada", 500_000, 750_000);
        assert_eq!(msg.to, "ada@example.com");
        assert!(msg.subject.contains("₦5,000.00"));
        assert!(msg.html.contains("₦7,500.00"));
    }
}
