/// Property-based tests using proptest
/// Tests invariants and properties that should hold for all inputs
use eudamed_enrichment::llm::{normalize_domain, parse_domain_answer, parse_employee_count};
use eudamed_enrichment::models::{PartnerCompany, Product};
use eudamed_enrichment::payload::UpdatePayload;
use eudamed_enrichment::scoring::{max_score, ranking_score};
use eudamed_enrichment::status::{RecordKind, Stage, PIPELINE_ORDER};
use eudamed_enrichment::store::{PendingQuery, SourceFilter};
use proptest::prelude::*;
use serde_json::Value;

const RISK_CODES: &[&str] = &[
    "refdata.risk-class.class-i",
    "refdata.risk-class.class-a",
    "refdata.risk-class.class-iia",
    "refdata.risk-class.class-iib",
    "refdata.risk-class.class-iii",
    "refdata.risk-class.class-b",
    "",
];

fn product_strategy() -> impl Strategy<Value = Product> {
    (
        prop::option::of(prop::sample::select(RISK_CODES)),
        prop::array::uniform5(prop::option::of(any::<bool>())),
    )
        .prop_map(|(risk, flags)| Product {
            risk_class: risk.map(str::to_string),
            medicinal_product: flags[0],
            human_tissues: flags[1],
            animal_tissues: flags[2],
            human_product: flags[3],
            administering_medicine: flags[4],
            ..Default::default()
        })
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

// Property: write payloads never carry null values
proptest! {
    #[test]
    fn payload_never_contains_null(
        fields in prop::collection::vec(("[a-z_]{1,12}", json_leaf()), 0..20),
        optional in prop::collection::vec(("[a-z_]{1,12}", prop::option::of(json_leaf())), 0..20)
    ) {
        let mut payload = UpdatePayload::new();
        for (column, value) in fields {
            payload.set(column, value);
        }
        for (column, value) in optional {
            payload.set_opt(column, value);
        }
        let payload = payload.with_status(Stage::GotCompanyDetails);
        prop_assert!(payload.as_map().values().all(|v| !v.is_null()));
        prop_assert_eq!(
            payload.get("scraping_status"),
            Some(&Value::from("GOT_COMPANY_DETAILS"))
        );
    }
}

// Property: the ranking score stays within [0, max] and has at most 2 decimals
proptest! {
    #[test]
    fn ranking_score_is_bounded(
        products in prop::collection::vec(product_strategy(), 0..60),
        employees in prop::option::of(-10i64..1_000_000),
        revenue in prop::option::of(-1e6f64..1e12),
        website_employees in -10i64..1_000_000
    ) {
        let partner = PartnerCompany {
            estimated_num_employees: employees,
            annual_revenue: revenue,
            ..Default::default()
        };
        for partner in [None, Some(&partner)] {
            let score = ranking_score(&products, partner, website_employees);
            prop_assert!(score >= 0.0);
            prop_assert!(score <= max_score());
            prop_assert!(((score * 100.0).round() - score * 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn more_products_never_lower_the_score(
        products in prop::collection::vec(product_strategy(), 0..30),
        extra in product_strategy()
    ) {
        let before = ranking_score(&products, None, 0);
        let mut more = products.clone();
        more.push(extra);
        prop_assert!(ranking_score(&more, None, 0) >= before);
    }
}

// Property: answer parsers never panic and only yield well-formed values
proptest! {
    #[test]
    fn domain_parsers_never_panic(raw in "\\PC*") {
        if let Some(domain) = normalize_domain(&raw) {
            prop_assert!(!domain.is_empty());
            prop_assert!(!domain.contains('/'));
            prop_assert_eq!(domain.to_lowercase(), domain.clone());
        }
        let _ = parse_domain_answer(&raw);
    }

    #[test]
    fn normalized_urls_reduce_to_host(
        host in "[a-v][a-z]{0,11}\\.(com|at|de|co\\.uk)",
        scheme in prop::sample::select(vec!["", "http://", "https://", "HTTPS://"]),
        www in any::<bool>(),
        suffix in prop::sample::select(vec!["", "/", "/de/kontakt", "?lang=en", ":8080/x"])
    ) {
        let raw = format!("{}{}{}{}", scheme, if www { "www." } else { "" }, host, suffix);
        prop_assert_eq!(normalize_domain(&raw), Some(host));
    }

    #[test]
    fn employee_count_parser(raw in "\\PC*", n in 1i64..10_000_000) {
        if let Some(count) = parse_employee_count(&raw) {
            prop_assert!(count > 0);
        }
        prop_assert_eq!(parse_employee_count(&n.to_string()), Some(n));
    }
}

// Property: selection never includes the target or anything after it
proptest! {
    #[test]
    fn pending_states_precede_target(idx in 0usize..PIPELINE_ORDER.len()) {
        let target = PIPELINE_ORDER[idx];
        for kind in [RecordKind::Company, RecordKind::Product, RecordKind::Certificate] {
            if !kind.chain().contains(&target) {
                continue;
            }
            for state in kind.pending_states(target) {
                prop_assert!(state.precedes(target));
                prop_assert!(kind.can_transition(state, target));
            }
        }
    }

    #[test]
    fn failed_records_only_return_for_their_stage(
        failed_idx in 0usize..PIPELINE_ORDER.len(),
        target_idx in 0usize..PIPELINE_ORDER.len(),
        retry in any::<bool>()
    ) {
        let failed = PIPELINE_ORDER[failed_idx];
        let target = PIPELINE_ORDER[target_idx];
        let query = PendingQuery {
            statuses: RecordKind::Company.pending_states(target),
            retry_stage: retry.then_some(target),
            filter: SourceFilter::default(),
            after_id: None,
            limit: 10,
        };
        prop_assert!(query.admits_failure(None));
        prop_assert_eq!(
            query.admits_failure(Some(failed.as_str())),
            retry && failed == target
        );
    }
}
