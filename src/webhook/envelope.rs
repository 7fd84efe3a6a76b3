//! Typed decoding of the provider's `entry → changes → value` envelope.
//!
//! Decoding is strict about shape: a field with the wrong JSON type, or a
//! body without an `entry` list, is a validation error. Unknown fields are
//! ignored so new provider additions do not break ingestion.

use crate::error::IngressError;
use crate::util::phone_variants;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `object` value the provider sends for WhatsApp Business deliveries.
pub const WHATSAPP_OBJECT: &str = "whatsapp_business_account";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub object: Option<String>,
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// One provider message before normalization.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Epoch seconds; the provider sends it as a string.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Decode and validate a raw (already authenticated) body.
    pub fn decode(body: &[u8]) -> Result<Self, IngressError> {
        let envelope: Self = serde_json::from_slice(body)
            .map_err(|e| IngressError::Validation(format!("envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<(), IngressError> {
        match self.object.as_deref() {
            None | Some(WHATSAPP_OBJECT) => Ok(()),
            Some(other) => Err(IngressError::Validation(format!(
                "unexpected object type {other:?}"
            ))),
        }
    }

    /// Collect messages and contact locales from changes addressed to `own_endpoint_id`.
    ///
    /// Changes for any other phone number id are dropped whole, including
    /// their contacts. Message order is preserved across changes.
    pub fn extract(self, own_endpoint_id: &str) -> ParsedEnvelope {
        let mut parsed = ParsedEnvelope::default();

        for change in self.entry.into_iter().flat_map(|entry| entry.changes) {
            let Some(value) = change.value else {
                continue;
            };
            let metadata = value.metadata.as_ref();
            let endpoint_id = metadata.and_then(|m| m.phone_number_id.as_deref());
            if endpoint_id != Some(own_endpoint_id) {
                parsed.foreign_changes += 1;
                continue;
            }

            if parsed.display_number.is_none() {
                parsed.display_number = metadata.and_then(|m| m.display_phone_number.clone());
            }
            for contact in &value.contacts {
                if let (Some(wa_id), Some(locale)) = (&contact.wa_id, &contact.locale) {
                    parsed.locales.insert(wa_id, locale);
                }
            }
            parsed.messages.extend(value.messages);
        }

        parsed
    }
}

/// Output of [`Envelope::extract`].
#[derive(Debug, Clone, Default)]
pub struct ParsedEnvelope {
    pub messages: Vec<RawMessage>,
    pub locales: ContactLocaleIndex,
    pub display_number: Option<String>,
    /// Changes skipped because they were addressed to another endpoint.
    pub foreign_changes: usize,
}

/// Sender locale lookup keyed by both bare and `+`-prefixed phone numbers.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ContactLocaleIndex(HashMap<String, String>);

impl ContactLocaleIndex {
    pub fn insert(&mut self, phone: &str, locale: &str) {
        let locale = locale.trim();
        if locale.is_empty() {
            return;
        }
        for variant in phone_variants(phone) {
            self.0.insert(variant, locale.to_string());
        }
    }

    /// Look up a locale by either phone format.
    pub fn get(&self, phone: &str) -> Option<&str> {
        self.0.get(phone.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
