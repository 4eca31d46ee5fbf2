//! PII-safe issue payloads for external trackers.
//!
//! `normalized_inputs` is a strict allow-list intersection with the
//! calculation context: fields outside the list are dropped, never
//! redacted. Customer names, tax ids, meter and subscriber numbers,
//! addresses and phone numbers can therefore never reach the tracker, no
//! matter what the upstream context contains. Lookup evidence is reduced
//! to status/source pairs; raw responses are discarded.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::router::{ActionSpec, IncidentSpec};

/// Fields allowed through to `normalized_inputs`.
const INPUT_ALLOWLIST: &[&str] = &[
    "invoice_period",
    "consumption_kwh",
    "ptf_date",
    "yekdem_date",
    "market_price_source",
    "tariff_code",
    "tariff_period",
    "ck_meta_present",
    "distribution_line_present",
    "meta_distribution_source",
    "computed_distribution_unit_price",
    "distribution_unit_price_invoice",
    "distribution_mismatch_pct",
    "confidence",
    "json_repair_applied",
    "distribution_total_tl",
    "energy_total_tl",
    "total_amount_tl",
];

#[derive(Debug, Clone, Serialize)]
pub struct IssuePayload {
    pub title: String,
    pub labels: Vec<String>,
    pub severity: String,
    pub dedupe_key: String,
    pub invoice: Value,
    pub primary_flag: String,
    pub category: String,
    pub action: Value,
    pub all_flags: Vec<String>,
    pub lookup_evidence: Value,
    pub normalized_inputs: Value,
    pub repro_hint: String,
}

impl IssuePayload {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
pub struct IssuePayloadBuilder;

impl IssuePayloadBuilder {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        incident: &IncidentSpec,
        dedupe_key: &str,
        provider: &str,
        invoice_id: &str,
        period: &str,
        calc_context: Option<&Value>,
        lookup_evidence: Option<&Value>,
    ) -> IssuePayload {
        // Allow-list intersection; the period is injected so it is always
        // present even when the context omits it.
        let mut context = match calc_context.and_then(Value::as_object) {
            Some(object) => object.clone(),
            None => Map::new(),
        };
        context.insert("invoice_period".to_string(), json!(period));

        let mut normalized = Map::new();
        for key in INPUT_ALLOWLIST {
            if let Some(value) = context.get(*key) {
                normalized.insert((*key).to_string(), value.clone());
            }
        }

        let evidence = lookup_evidence.and_then(Value::as_object);
        let pick = |key: &str| -> Value {
            evidence
                .and_then(|e| e.get(key))
                .cloned()
                .unwrap_or(Value::Null)
        };
        let safe_lookup = json!({
            "market_price": {
                "status": pick("market_price_status"),
                "source": pick("market_price_source"),
            },
            "tariff": {
                "status": pick("tariff_status"),
                "source": pick("tariff_source"),
            },
        });

        let title = format!(
            "[{}] provider={} invoice={} period={}",
            incident.primary_flag, provider, invoice_id, period
        );
        let labels = vec![
            "incident".to_string(),
            incident.category.clone(),
            incident.primary_flag.clone(),
            incident.action.owner.clone(),
        ];

        IssuePayload {
            title,
            labels,
            severity: incident.severity.as_str().to_string(),
            dedupe_key: dedupe_key.to_string(),
            invoice: json!({
                "provider": provider,
                "invoice_id": invoice_id,
                "period": period,
            }),
            primary_flag: incident.primary_flag.clone(),
            category: incident.category.clone(),
            // hint_text stays internal; only type/owner/code are exposed.
            action: json!({
                "type": incident.action.kind,
                "owner": incident.action.owner,
                "code": incident.action.code,
            }),
            all_flags: incident.all_flags.clone(),
            lookup_evidence: safe_lookup,
            normalized_inputs: Value::Object(normalized),
            repro_hint: build_repro_hint(&incident.primary_flag, &incident.all_flags),
        }
    }
}

/// Synthetic one-sentence repro recipe. Never contains real identifiers.
fn build_repro_hint(primary_flag: &str, all_flags: &[String]) -> String {
    match primary_flag {
        "CALC_BUG" => "Create synthetic fixture: CK meta present, lookup performed, \
             computed distribution absurd (0/negative/very low)."
            .to_string(),
        "MARKET_PRICE_MISSING" => "Create synthetic fixture: valid extraction fields but \
             market price provider returns not_found for period."
            .to_string(),
        "TARIFF_LOOKUP_FAILED" => "Create synthetic fixture: tariff code present, \
             tariff lookup returns not_found/failed."
            .to_string(),
        "TARIFF_META_MISSING" => "Create synthetic fixture: distribution_line_present OR \
             expected CK meta, but tariff_meta missing."
            .to_string(),
        "CONSUMPTION_MISSING" => "Create synthetic fixture: missing consumption_kwh \
             while other required fields present."
            .to_string(),
        "DISTRIBUTION_MISSING" => "Create synthetic fixture: valid invoice but \
             distribution tariff lookup returns not_found."
            .to_string(),
        "DISTRIBUTION_MISMATCH" => "Create synthetic fixture: distribution_line_present, \
             tariff lookup success, but values differ >3%."
            .to_string(),
        "MISSING_FIELDS" => "Create synthetic fixture: some required fields missing \
             (invoice_date, period, etc.) but consumption present."
            .to_string(),
        _ => {
            let flags = if all_flags.is_empty() {
                primary_flag.to_string()
            } else {
                all_flags
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(",")
            };
            format!(
                "Create synthetic fixture triggering primary_flag={primary_flag} with flags={flags}."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::model::IncidentSeverity;

    fn spec(primary_flag: &str) -> IncidentSpec {
        IncidentSpec {
            primary_flag: primary_flag.to_string(),
            category: "CALC_BUG".to_string(),
            severity: IncidentSeverity::S2,
            action: ActionSpec {
                kind: "BUG_REPORT".to_string(),
                owner: "calc".to_string(),
                code: "ENGINE_REGRESSION".to_string(),
                hint_text: Some("internal hint".to_string()),
            },
            all_flags: vec!["CALC_BUG".to_string(), "TARIFF_META_MISSING".to_string()],
        }
    }

    fn build(calc_context: Option<Value>) -> IssuePayload {
        IssuePayloadBuilder::new().build(
            &spec("CALC_BUG"),
            "abc123",
            "ck",
            "INV1",
            "2025-01",
            calc_context.as_ref(),
            None,
        )
    }

    #[test]
    fn normalized_inputs_is_subset_of_allowlist() {
        let payload = build(Some(json!({
            "consumption_kwh": 1250.0,
            "tariff_code": "T-IND",
            "customer_name": "ACME A.S.",
            "tax_id": "1234567890",
            "meter_number": "MTR-9",
            "subscriber_number": "SUB-1",
            "address": "Some Street 5",
            "phone": "+90 555 000 00 00",
        })));

        let inputs = payload.normalized_inputs.as_object().unwrap();
        for key in inputs.keys() {
            assert!(
                INPUT_ALLOWLIST.contains(&key.as_str()),
                "{key} leaked into normalized_inputs"
            );
        }
        assert!(inputs.contains_key("consumption_kwh"));
        assert!(inputs.contains_key("tariff_code"));
        assert!(!inputs.contains_key("customer_name"));
        assert!(!inputs.contains_key("tax_id"));
        assert!(!inputs.contains_key("meter_number"));
    }

    #[test]
    fn invoice_period_is_always_injected() {
        let payload = build(None);
        assert_eq!(payload.normalized_inputs["invoice_period"], json!("2025-01"));
    }

    #[test]
    fn title_and_labels_follow_format() {
        let payload = build(None);
        assert_eq!(payload.title, "[CALC_BUG] provider=ck invoice=INV1 period=2025-01");
        assert_eq!(
            payload.labels,
            vec!["incident", "CALC_BUG", "CALC_BUG", "calc"]
        );
    }

    #[test]
    fn action_block_never_exposes_hint_text() {
        let payload = build(None);
        let action = payload.action.as_object().unwrap();
        assert_eq!(action.len(), 3);
        assert_eq!(action["type"], json!("BUG_REPORT"));
        assert_eq!(action["owner"], json!("calc"));
        assert_eq!(action["code"], json!("ENGINE_REGRESSION"));
    }

    #[test]
    fn lookup_evidence_is_reduced_to_status_and_source() {
        let payload = IssuePayloadBuilder::new().build(
            &spec("CALC_BUG"),
            "k",
            "ck",
            "INV1",
            "2025-01",
            None,
            Some(&json!({
                "market_price_status": "ok",
                "market_price_source": "epias",
                "tariff_status": "not_found",
                "tariff_source": "table_v4",
                "raw_response": {"huge": "blob", "customer": "ACME"},
            })),
        );
        assert_eq!(
            payload.lookup_evidence,
            json!({
                "market_price": {"status": "ok", "source": "epias"},
                "tariff": {"status": "not_found", "source": "table_v4"},
            })
        );
    }

    #[test]
    fn known_flags_have_specific_repro_hints() {
        assert!(build_repro_hint("MARKET_PRICE_MISSING", &[]).contains("not_found"));
        assert!(build_repro_hint("CONSUMPTION_MISSING", &[]).contains("consumption_kwh"));
    }

    #[test]
    fn unknown_flag_gets_generic_hint_without_identifiers() {
        let hint = build_repro_hint("NEW_FLAG", &["A".to_string(), "B".to_string()]);
        assert!(hint.contains("primary_flag=NEW_FLAG"));
        assert!(hint.contains("A,B"));
    }
}
