use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;
use std::future::Future;

use crate::{
    address::{NpiAddress, format_address},
    batch::RowLookup,
    config::RegistryConfig,
    constants::USER_AGENT,
    error::{Error, Result},
    models::{InputRow, OutputRow, RowStatus, non_empty},
};

// Registry payloads are loosely typed: a field of an unexpected type reads as absent
// instead of failing the whole response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct NpiApiResponse {
    #[serde(default, deserialize_with = "lenient_count")]
    result_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    results: Option<Vec<NpiResult>>,
}

#[derive(Debug, Default, Deserialize)]
struct NpiResult {
    #[serde(default, deserialize_with = "lenient_text")]
    number: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    basic: Option<NpiBasic>,
    #[serde(default, deserialize_with = "lenient")]
    addresses: Option<Vec<NpiAddress>>,
    #[serde(rename = "practiceLocations", default, deserialize_with = "lenient")]
    practice_locations: Option<Vec<NpiAddress>>,
    #[serde(default, deserialize_with = "lenient")]
    taxonomies: Option<Vec<NpiTaxonomy>>,
}

#[derive(Debug, Default, Deserialize)]
struct NpiBasic {
    #[serde(default, deserialize_with = "lenient_text")]
    first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    middle_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    last_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NpiTaxonomy {
    #[serde(default, deserialize_with = "lenient_text")]
    code: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    desc: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    state: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    license: Option<String>,
    primary: Option<Value>,
}

/// Text field that also accepts numbers and booleans. Other types read as absent.
pub(crate) fn lenient_text<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Nested object or list; absent when its shape does not match.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|value| serde_json::from_value(value).ok()))
}

impl NpiTaxonomy {
    fn is_primary(&self) -> bool {
        match &self.primary {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => {
                flag.eq_ignore_ascii_case("true") || flag.eq_ignore_ascii_case("y")
            }
            _ => false,
        }
    }
}

/// Client for the NPPES NPI Registry.
///
/// Holds the shared HTTP handle; cloning is cheap and all clones share one
/// connection pool, so a single instance can serve every lookup worker.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(http: Client, config: RegistryConfig) -> Self {
        Self { http, config }
    }

    pub fn build_http_client() -> reqwest::Result<Client> {
        Client::builder().user_agent(USER_AGENT).build()
    }

    /// Looks up one practitioner. Never fails: exhausted retries become a single
    /// `Failed` row.
    pub async fn lookup(&self, row: &InputRow) -> Vec<OutputRow> {
        match self.fetch_with_retry(row).await {
            Ok(response) => rows_from_response(row, response),
            Err(err) => {
                tracing::warn!(
                    first_name = row.first_name.as_deref().unwrap_or(""),
                    last_name = row.last_name.as_deref().unwrap_or(""),
                    state = row.state.as_deref().unwrap_or(""),
                    error = %err,
                    "NPI lookup gave up; recording row as failed"
                );
                vec![OutputRow::bare(row, RowStatus::Failed)]
            }
        }
    }

    async fn fetch_with_retry(&self, row: &InputRow) -> Result<NpiApiResponse> {
        let policy = self.config.retry;
        let attempts = policy.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(policy.delay_before_retry(attempt - 1)).await;
            }
            match self.fetch_once(row).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(attempt, attempts, error = %err, "NPI lookup attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::RegistryLookup("no lookup attempts were made".to_string())))
    }

    async fn fetch_once(&self, row: &InputRow) -> Result<NpiApiResponse> {
        let mut query: Vec<(&str, &str)> = vec![("version", self.config.api_version.as_str())];
        if let Some(first_name) = row.first_name.as_deref() {
            query.push(("first_name", first_name));
        }
        if let Some(last_name) = row.last_name.as_deref() {
            query.push(("last_name", last_name));
        }
        if let Some(state) = row.state.as_deref() {
            query.push(("state", state));
        }

        let resp = self
            .http
            .get(&self.config.api_base_url)
            .query(&query)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|err| Error::RegistryLookup(format!("request failed: {err}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| Error::RegistryLookup(format!("failed reading body: {err}")))?;

        if status != StatusCode::OK {
            return Err(Error::RegistryLookup(format!(
                "HTTP {status}. Body: {}",
                truncate_for_log(&body)
            )));
        }

        parse_response(&body)
    }
}

impl RowLookup for RegistryClient {
    fn lookup(&self, row: &InputRow) -> impl Future<Output = Vec<OutputRow>> + Send {
        RegistryClient::lookup(self, row)
    }
}

/// Parses a 200 body. Invalid JSON and a top-level `Errors` key are both lookup errors.
pub(crate) fn parse_response(body: &str) -> Result<NpiApiResponse> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        Error::RegistryLookup(format!(
            "invalid JSON ({err}). Body: {}",
            truncate_for_log(body)
        ))
    })?;

    if let Some(errors) = value.get("Errors") {
        return Err(Error::RegistryLookup(format!(
            "API error: {}",
            truncate_for_log(&errors.to_string())
        )));
    }

    serde_json::from_value(value)
        .map_err(|err| Error::RegistryLookup(format!("unexpected response shape: {err}")))
}

fn rows_from_response(input: &InputRow, response: NpiApiResponse) -> Vec<OutputRow> {
    let results = response.results.unwrap_or_default();
    if response.result_count.unwrap_or(0) == 0 || results.is_empty() {
        return vec![OutputRow::bare(input, RowStatus::NoMatch)];
    }

    results
        .into_iter()
        .map(|result| row_from_result(input, result))
        .collect()
}

fn row_from_result(input: &InputRow, result: NpiResult) -> OutputRow {
    let basic = result.basic.unwrap_or_default();

    let full_name = [&basic.first_name, &basic.middle_name, &basic.last_name]
        .into_iter()
        .filter_map(|part| part.as_deref().and_then(non_empty))
        .collect::<Vec<_>>()
        .join(" ");

    let mut mailing_address = None;
    let mut primary_practice_address = None;
    for addr in result.addresses.unwrap_or_default() {
        // Later entries with the same purpose overwrite earlier ones.
        match addr.address_purpose.as_deref() {
            Some("MAILING") => mailing_address = formatted(&addr),
            Some("LOCATION") => primary_practice_address = formatted(&addr),
            _ => {}
        }
    }

    let secondary_practice_address = result
        .practice_locations
        .map(|locations| {
            locations
                .iter()
                .map(format_address)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|joined| !joined.is_empty());

    let taxonomies = result.taxonomies.unwrap_or_default();
    let primary = primary_taxonomy(input, &taxonomies);

    OutputRow {
        first_name: input.first_name.clone(),
        last_name: input.last_name.clone(),
        state: input.state.clone(),
        found_first_name: basic.first_name.as_deref().and_then(non_empty),
        found_last_name: basic.last_name.as_deref().and_then(non_empty),
        found_state: primary.found_state,
        full_name: non_empty(&full_name),
        npi_number: result.number.as_deref().and_then(non_empty),
        mailing_address,
        primary_practice_address,
        secondary_practice_address,
        taxonomy: primary.taxonomy,
        specialty: primary.specialty,
        license: primary.license,
        status: RowStatus::Success,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PrimaryTaxonomy {
    taxonomy: Option<String>,
    license: Option<String>,
    specialty: Option<String>,
    found_state: Option<String>,
}

/// Derives taxonomy fields from the first entry flagged primary. Later entries are
/// ignored even when they are flagged too.
fn primary_taxonomy(input: &InputRow, taxonomies: &[NpiTaxonomy]) -> PrimaryTaxonomy {
    let Some(tax) = taxonomies.iter().find(|tax| tax.is_primary()) else {
        return PrimaryTaxonomy::default();
    };

    let state = tax.state.as_deref().and_then(non_empty);
    let code = tax.code.as_deref().and_then(non_empty);
    let license = tax.license.as_deref().and_then(non_empty);

    let taxonomy = match (&state, code) {
        (Some(state), Some(code)) => Some(format!("{state}-{code}")),
        (_, code) => code,
    };
    let license = match (&state, license) {
        (Some(state), Some(license)) => Some(format!("{state}-{license}")),
        (_, license) => license,
    };

    PrimaryTaxonomy {
        taxonomy,
        license,
        specialty: tax.desc.as_deref().and_then(non_empty),
        found_state: state.or_else(|| input.state.clone()),
    }
}

fn formatted(addr: &NpiAddress) -> Option<String> {
    Some(format_address(addr)).filter(|text| !text.is_empty())
}

fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut end = max_len;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> InputRow {
        InputRow::new("Jane", "Doe", "NY")
    }

    fn rows_for(body: Value) -> Vec<OutputRow> {
        let response = parse_response(&body.to_string()).unwrap();
        rows_from_response(&input(), response)
    }

    #[test]
    fn zero_results_is_single_no_match_row() {
        let rows = rows_for(json!({"result_count": 0, "results": []}));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], OutputRow::bare(&input(), RowStatus::NoMatch));
        assert!(rows[0].taxonomy.is_none());
        assert!(rows[0].npi_number.is_none());
    }

    #[test]
    fn errors_key_is_a_lookup_error() {
        let body = json!({"Errors": [{"description": "No valid search criteria"}]});
        let err = parse_response(&body.to_string()).unwrap_err();
        assert!(matches!(err, Error::RegistryLookup(_)));
    }

    #[test]
    fn invalid_json_is_a_lookup_error() {
        assert!(matches!(
            parse_response("<html>busy</html>"),
            Err(Error::RegistryLookup(_))
        ));
    }

    #[test]
    fn one_row_per_result() {
        let rows = rows_for(json!({
            "result_count": 2,
            "results": [
                {"number": 1111111111u64, "basic": {"first_name": "JANE", "last_name": "DOE"}},
                {"number": "2222222222", "basic": {"first_name": "JANE", "middle_name": "Q", "last_name": "DOE"}}
            ]
        }));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].npi_number.as_deref(), Some("1111111111"));
        assert_eq!(rows[0].full_name.as_deref(), Some("JANE DOE"));
        assert_eq!(rows[1].npi_number.as_deref(), Some("2222222222"));
        assert_eq!(rows[1].full_name.as_deref(), Some("JANE Q DOE"));
        assert!(rows.iter().all(|r| r.status == RowStatus::Success));
        assert!(rows.iter().all(|r| r.first_name.as_deref() == Some("Jane")));
    }

    #[test]
    fn last_address_per_purpose_wins() {
        let rows = rows_for(json!({
            "result_count": 1,
            "results": [{
                "basic": {"first_name": "JANE", "last_name": "DOE"},
                "addresses": [
                    {"address_purpose": "LOCATION", "address_1": "1 First Ave", "city": "ALBANY", "state": "NY"},
                    {"address_purpose": "MAILING", "address_1": "PO Box 9"},
                    {"address_purpose": "LOCATION", "address_1": "2 Second Ave", "city": "TROY", "state": "NY"}
                ]
            }]
        }));
        assert_eq!(
            rows[0].primary_practice_address.as_deref(),
            Some("2 Second Ave, TROY NY")
        );
        assert_eq!(rows[0].mailing_address.as_deref(), Some("PO Box 9"));
    }

    #[test]
    fn practice_locations_join_in_source_order() {
        let rows = rows_for(json!({
            "result_count": 1,
            "results": [{
                "basic": {},
                "practiceLocations": [
                    {"address_1": "10 A St", "telephone_number": "555-1"},
                    {"address_1": "20 B St"}
                ]
            }]
        }));
        assert_eq!(
            rows[0].secondary_practice_address.as_deref(),
            Some("10 A St, Phone: 555-1; 20 B St")
        );
    }

    #[test]
    fn primary_taxonomy_string_flag() {
        let rows = rows_for(json!({
            "result_count": 1,
            "results": [{
                "basic": {"first_name": "JANE", "last_name": "DOE"},
                "taxonomies": [
                    {"primary": false, "state": "NY", "code": "207Q00000X", "license": "999", "desc": "Other"},
                    {"primary": "Y", "state": "CA", "code": "101Y00000X", "license": "12345", "desc": "Family Medicine"}
                ]
            }]
        }));
        let row = &rows[0];
        assert_eq!(row.taxonomy.as_deref(), Some("CA-101Y00000X"));
        assert_eq!(row.license.as_deref(), Some("CA-12345"));
        assert_eq!(row.specialty.as_deref(), Some("Family Medicine"));
        assert_eq!(row.found_state.as_deref(), Some("CA"));
    }

    #[test]
    fn first_primary_taxonomy_wins() {
        let taxonomies = vec![
            NpiTaxonomy {
                code: Some("AAA".into()),
                primary: Some(json!(true)),
                ..NpiTaxonomy::default()
            },
            NpiTaxonomy {
                code: Some("BBB".into()),
                state: Some("TX".into()),
                primary: Some(json!("true")),
                ..NpiTaxonomy::default()
            },
        ];
        let primary = primary_taxonomy(&input(), &taxonomies);
        assert_eq!(primary.taxonomy.as_deref(), Some("AAA"));
        assert_eq!(primary.license, None);
        assert_eq!(primary.found_state.as_deref(), Some("NY"));
    }

    #[test]
    fn no_primary_taxonomy_leaves_fields_empty() {
        let taxonomies = vec![NpiTaxonomy {
            code: Some("AAA".into()),
            primary: Some(json!("N")),
            ..NpiTaxonomy::default()
        }];
        assert_eq!(
            primary_taxonomy(&input(), &taxonomies),
            PrimaryTaxonomy::default()
        );
    }

    #[test]
    fn off_type_scalars_do_not_fail_the_response() {
        let rows = rows_for(json!({
            "result_count": "1",
            "results": [{
                "number": 1234567890u64,
                "basic": {"first_name": "JANE", "middle_name": null, "last_name": "DOE"},
                "addresses": [
                    {"address_purpose": "LOCATION", "address_1": "1 St", "postal_code": 12345, "fax_number": {}}
                ],
                "taxonomies": [
                    {"primary": true, "state": "CA", "code": "101Y00000X", "license": 778899, "desc": "Counselor"}
                ]
            }]
        }));
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.status, RowStatus::Success);
        assert_eq!(row.primary_practice_address.as_deref(), Some("1 St, 12345"));
        assert_eq!(row.license.as_deref(), Some("CA-778899"));
        assert_eq!(row.full_name.as_deref(), Some("JANE DOE"));
        assert_eq!(row.npi_number.as_deref(), Some("1234567890"));
    }

    #[test]
    fn mismatched_nested_shape_reads_as_absent() {
        let rows = rows_for(json!({
            "result_count": 1,
            "results": [{
                "number": "1234567890",
                "basic": "unexpected",
                "practiceLocations": {"address_1": "not a list"}
            }]
        }));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RowStatus::Success);
        assert_eq!(rows[0].full_name, None);
        assert_eq!(rows[0].secondary_practice_address, None);
        assert_eq!(rows[0].npi_number.as_deref(), Some("1234567890"));
    }

    #[test]
    fn address_text_is_kept_as_sent() {
        let rows = rows_for(json!({
            "result_count": 1,
            "results": [{
                "addresses": [{"address_purpose": "MAILING", "address_1": "  PO Box 9 ", "city": "ALBANY"}]
            }]
        }));
        assert_eq!(rows[0].mailing_address.as_deref(), Some("  PO Box 9 , ALBANY"));
    }

    #[test]
    fn result_count_without_results_is_no_match() {
        let rows = rows_for(json!({"result_count": 3}));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RowStatus::NoMatch);
    }
}
