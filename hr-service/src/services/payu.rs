//! PayU payment provider integration.
//!
//! Checkout signature generation and confirmation webhook verification. PayU
//! signs a tilde-joined field string with MD5; the same scheme is applied to
//! both directions, with the amount formatted per PayU's one-or-two-decimals
//! rule.

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use std::str::FromStr;
use uuid::Uuid;

use service_core::error::AppError;
use service_core::utils::signature::{md5_hex, signatures_match};

use crate::config::PayuConfig;

/// PayU `state_pol` transaction states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayuState {
    Approved,
    Expired,
    Declined,
    Pending,
}

impl PayuState {
    pub fn from_state_pol(code: &str) -> Option<Self> {
        match code {
            "4" => Some(PayuState::Approved),
            "5" => Some(PayuState::Expired),
            "6" => Some(PayuState::Declined),
            "7" => Some(PayuState::Pending),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayuState::Approved => "approved",
            PayuState::Expired => "expired",
            PayuState::Declined => "declined",
            PayuState::Pending => "pending",
        }
    }
}

/// PayU client. Holds the merchant credentials; all operations are local
/// signature math, since PayU calls us rather than the other way around.
#[derive(Clone)]
pub struct PayuClient {
    config: PayuConfig,
}

impl PayuClient {
    pub fn new(config: PayuConfig) -> Self {
        Self { config }
    }

    /// Check if PayU is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty() && !self.config.merchant_id.is_empty()
    }

    pub fn merchant_id(&self) -> &str {
        &self.config.merchant_id
    }

    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }

    /// Signature the client embeds when initiating checkout:
    /// `MD5(api_key~merchant_id~reference~amount~currency)`.
    pub fn checkout_signature(&self, reference: &str, amount: &str, currency: &str) -> String {
        let payload = format!(
            "{}~{}~{}~{}~{}",
            self.config.api_key.expose_secret(),
            self.config.merchant_id,
            reference,
            amount,
            currency
        );
        md5_hex(&payload)
    }

    /// Signature PayU sends on confirmation webhooks:
    /// `MD5(api_key~merchant_id~reference~new_value~currency~state_pol)`.
    pub fn confirmation_signature(
        &self,
        reference: &str,
        value: &str,
        currency: &str,
        state_pol: &str,
    ) -> Result<String, AppError> {
        let new_value = format_signature_amount(value)?;
        let payload = format!(
            "{}~{}~{}~{}~{}~{}",
            self.config.api_key.expose_secret(),
            self.config.merchant_id,
            reference,
            new_value,
            currency,
            state_pol
        );
        Ok(md5_hex(&payload))
    }

    /// Verify a confirmation webhook signature in constant time.
    pub fn verify_confirmation_signature(
        &self,
        received: &str,
        reference: &str,
        value: &str,
        currency: &str,
        state_pol: &str,
    ) -> Result<bool, AppError> {
        let expected = self.confirmation_signature(reference, value, currency, state_pol)?;
        Ok(signatures_match(&expected, &received.to_lowercase()))
    }

    /// Signature for the internal cancel webhook:
    /// `MD5(api_key~merchant_id~subscription_id)`.
    pub fn cancel_signature(&self, subscription_id: &str) -> String {
        let payload = format!(
            "{}~{}~{}",
            self.config.api_key.expose_secret(),
            self.config.merchant_id,
            subscription_id
        );
        md5_hex(&payload)
    }

    pub fn verify_cancel_signature(&self, received: &str, subscription_id: &str) -> bool {
        let expected = self.cancel_signature(subscription_id);
        signatures_match(&expected, &received.to_lowercase())
    }
}

/// PayU signs the amount with one decimal when the second decimal is zero,
/// two decimals otherwise (e.g. `150000.00` signs as `150000.0`,
/// `150000.26` signs as `150000.26`).
pub fn format_signature_amount(value: &str) -> Result<String, AppError> {
    let amount = Decimal::from_str(value.trim())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid amount: {}", value)))?;

    let rounded = amount.round_dp(2);
    let hundredths = rounded * Decimal::from(100);
    if (hundredths % Decimal::from(10)).is_zero() {
        Ok(format!("{:.1}", rounded))
    } else {
        Ok(format!("{:.2}", rounded))
    }
}

/// Checkout references take the form `SUB-{user_id}-{unix_millis}`.
pub fn new_reference(user_id: Uuid, now_millis: i64) -> String {
    format!("SUB-{}-{}", user_id, now_millis)
}

/// Recover the user id from a checkout reference.
pub fn parse_reference(reference: &str) -> Option<Uuid> {
    let rest = reference.strip_prefix("SUB-")?;
    let uuid_part = rest.get(..36)?;
    Uuid::parse_str(uuid_part).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> PayuConfig {
        PayuConfig {
            api_key: Secret::new("4Vj8eK4rloUd272L48hsrarnUA".to_string()),
            merchant_id: "508029".to_string(),
            account_id: "512321".to_string(),
            test_mode: true,
        }
    }

    #[test]
    fn test_is_configured() {
        let client = PayuClient::new(test_config());
        assert!(client.is_configured());

        let empty = PayuConfig {
            api_key: Secret::new(String::new()),
            merchant_id: String::new(),
            account_id: String::new(),
            test_mode: false,
        };
        assert!(!PayuClient::new(empty).is_configured());
    }

    #[test]
    fn state_pol_codes_map_to_states() {
        assert_eq!(PayuState::from_state_pol("4"), Some(PayuState::Approved));
        assert_eq!(PayuState::from_state_pol("5"), Some(PayuState::Expired));
        assert_eq!(PayuState::from_state_pol("6"), Some(PayuState::Declined));
        assert_eq!(PayuState::from_state_pol("7"), Some(PayuState::Pending));
        assert_eq!(PayuState::from_state_pol("99"), None);
    }

    #[test]
    fn amount_with_trailing_zero_cent_signs_with_one_decimal() {
        assert_eq!(format_signature_amount("150000.00").unwrap(), "150000.0");
        assert_eq!(format_signature_amount("150000").unwrap(), "150000.0");
        assert_eq!(format_signature_amount("150000.50").unwrap(), "150000.5");
    }

    #[test]
    fn amount_with_nonzero_cent_signs_with_two_decimals() {
        assert_eq!(format_signature_amount("150000.26").unwrap(), "150000.26");
        assert_eq!(format_signature_amount("150000.05").unwrap(), "150000.05");
    }

    #[test]
    fn malformed_amount_is_rejected() {
        assert!(format_signature_amount("not-a-number").is_err());
    }

    #[test]
    fn confirmation_signature_round_trips() {
        let client = PayuClient::new(test_config());
        let signature = client
            .confirmation_signature("SUB-ref-1", "45000.00", "COP", "4")
            .unwrap();

        assert!(client
            .verify_confirmation_signature(&signature, "SUB-ref-1", "45000.00", "COP", "4")
            .unwrap());
    }

    #[test]
    fn confirmation_signature_rejects_state_tampering() {
        let client = PayuClient::new(test_config());
        // Signed as declined, replayed as approved.
        let signature = client
            .confirmation_signature("SUB-ref-1", "45000.00", "COP", "6")
            .unwrap();

        assert!(!client
            .verify_confirmation_signature(&signature, "SUB-ref-1", "45000.00", "COP", "4")
            .unwrap());
    }

    #[test]
    fn confirmation_signature_accepts_uppercase_hex() {
        let client = PayuClient::new(test_config());
        let signature = client
            .confirmation_signature("SUB-ref-1", "45000.00", "COP", "4")
            .unwrap()
            .to_uppercase();

        assert!(client
            .verify_confirmation_signature(&signature, "SUB-ref-1", "45000.00", "COP", "4")
            .unwrap());
    }

    #[test]
    fn cancel_signature_round_trips() {
        let client = PayuClient::new(test_config());
        let signature = client.cancel_signature("some-subscription-id");
        assert!(client.verify_cancel_signature(&signature, "some-subscription-id"));
        assert!(!client.verify_cancel_signature(&signature, "another-subscription-id"));
    }

    #[test]
    fn reference_round_trips_the_user_id() {
        let user_id = Uuid::new_v4();
        let reference = new_reference(user_id, 1_700_000_000_000);
        assert_eq!(parse_reference(&reference), Some(user_id));
    }

    #[test]
    fn garbage_references_do_not_parse() {
        assert_eq!(parse_reference("ORDER-123"), None);
        assert_eq!(parse_reference("SUB-not-a-uuid"), None);
        assert_eq!(parse_reference(""), None);
    }
}
