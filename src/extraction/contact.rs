use serde::{Deserialize, Serialize};

use super::{mean_confidence, ConfidenceBadge, FieldView, OcrField};

pub const UNKNOWN_CONTACT: &str = "Unknown contact";

/// Business card or letterhead analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedContact {
    #[serde(alias = "contact_name")]
    pub full_name: OcrField<String>,
    #[serde(alias = "company_names")]
    pub company_name: OcrField<String>,
    pub job_title: OcrField<String>,
    #[serde(alias = "emails")]
    pub email: OcrField<String>,
    #[serde(alias = "phones", alias = "mobile_phone")]
    pub phone: OcrField<String>,
    #[serde(alias = "addresses")]
    pub address: OcrField<String>,
    pub website: OcrField<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactPresentation {
    pub display_name: String,
    pub full_name: FieldView<String>,
    pub company_name: FieldView<String>,
    pub job_title: FieldView<String>,
    pub email: FieldView<String>,
    pub phone: FieldView<String>,
    pub address: FieldView<String>,
    pub website: FieldView<String>,
    pub overall_confidence: Option<f64>,
    pub overall_badge: ConfidenceBadge,
}

impl AnalyzedContact {
    pub fn present(&self) -> ContactPresentation {
        let fields = [
            self.full_name.view(),
            self.company_name.view(),
            self.job_title.view(),
            self.email.view(),
            self.phone.view(),
            self.address.view(),
            self.website.view(),
        ];
        let overall_confidence = mean_confidence(fields.iter().map(|field| field.confidence));
        let [full_name, company_name, job_title, email, phone, address, website] = fields;

        ContactPresentation {
            display_name: self
                .company_name
                .text()
                .or_else(|| self.full_name.text())
                .unwrap_or_else(|| UNKNOWN_CONTACT.to_string()),
            email: normalize_email(email),
            full_name,
            company_name,
            job_title,
            phone,
            address,
            website,
            overall_badge: ConfidenceBadge::classify(
                overall_confidence.is_some(),
                overall_confidence,
            ),
            overall_confidence,
        }
    }
}

fn normalize_email(mut view: FieldView<String>) -> FieldView<String> {
    view.value = view
        .value
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| email.contains('@'));
    view
}

impl ContactPresentation {
    /// Contact person shown on a customer record, when it differs from the
    /// display name.
    pub fn contact_person(&self) -> Option<String> {
        self.full_name
            .value
            .clone()
            .filter(|name| *name != self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn company_name_wins_for_display() {
        let contact: AnalyzedContact = serde_json::from_value(json!({
            "contact_name": { "value": "Ada Lovelace", "confidence": 0.97 },
            "company_names": { "value": "Analytical Engines", "confidence": 0.8 },
            "emails": { "value": " Ada@Engines.example ", "confidence": 0.6 }
        }))
        .unwrap();
        let presentation = contact.present();

        assert_eq!(presentation.display_name, "Analytical Engines");
        assert_eq!(presentation.contact_person().as_deref(), Some("Ada Lovelace"));
        assert_eq!(presentation.email.value.as_deref(), Some("ada@engines.example"));
        assert_eq!(presentation.email.badge, ConfidenceBadge::Low);
        assert_eq!(presentation.overall_confidence, Some(0.79));
        assert_eq!(presentation.website.badge, ConfidenceBadge::Missing);
    }

    #[test]
    fn empty_payload_uses_placeholder() {
        let presentation = AnalyzedContact::default().present();
        assert_eq!(presentation.display_name, UNKNOWN_CONTACT);
        assert_eq!(presentation.contact_person(), None);
        assert_eq!(presentation.overall_badge, ConfidenceBadge::Missing);
    }
}
