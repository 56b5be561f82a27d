use serde::Deserialize;

use crate::npi::lenient_text;

/// Address entry as it appears in `addresses[]` and `practiceLocations[]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NpiAddress {
    #[serde(default, deserialize_with = "lenient_text")]
    pub address_purpose: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub address_1: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub address_2: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub postal_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub telephone_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub fax_number: Option<String>,
}

/// Renders an address as `line 1, line 2, City ST 12345, Phone: x | Fax: y`.
///
/// Absent or blank fields are skipped along with their separators, so an empty
/// record formats to an empty string. Other values are used as sent.
pub fn format_address(addr: &NpiAddress) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(line) = present(&addr.address_1) {
        parts.push(line.to_string());
    }
    if let Some(line) = present(&addr.address_2) {
        parts.push(line.to_string());
    }

    let city_state_zip = [&addr.city, &addr.state, &addr.postal_code]
        .into_iter()
        .filter_map(present)
        .collect::<Vec<_>>()
        .join(" ");
    if !city_state_zip.is_empty() {
        parts.push(city_state_zip);
    }

    let mut contact = Vec::new();
    if let Some(phone) = present(&addr.telephone_number) {
        contact.push(format!("Phone: {phone}"));
    }
    if let Some(fax) = present(&addr.fax_number) {
        contact.push(format!("Fax: {fax}"));
    }
    if !contact.is_empty() {
        parts.push(contact.join(" | "));
    }

    parts.join(", ")
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
