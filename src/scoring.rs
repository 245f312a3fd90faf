//! Composite ranking score.
//!
//! A pure function of a company's scored products, its enrichment-partner
//! record and the employee count found on the web. Every dimension is a
//! count times a weight, capped per dimension.

use crate::models::{PartnerCompany, Product};

/// Count × weight, capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimension {
    pub weight: f64,
    pub cap: f64,
}

impl Dimension {
    const fn new(weight: f64, cap: f64) -> Self {
        Self { weight, cap }
    }

    pub fn score(&self, count: usize) -> f64 {
        (count as f64 * self.weight).min(self.cap)
    }
}

/// Registry risk-class tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskTier {
    I,
    IIa,
    IIb,
    III,
}

impl RiskTier {
    /// Maps a registry risk-class code to its tier. Class A (IVD) counts as
    /// tier I. Unknown codes map to `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "refdata.risk-class.class-i" | "refdata.risk-class.class-a" => Some(RiskTier::I),
            "refdata.risk-class.class-iia" => Some(RiskTier::IIa),
            "refdata.risk-class.class-iib" => Some(RiskTier::IIb),
            "refdata.risk-class.class-iii" => Some(RiskTier::III),
            _ => None,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            RiskTier::I => RISK_CLASS_I,
            RiskTier::IIa => RISK_CLASS_IIA,
            RiskTier::IIb => RISK_CLASS_IIB,
            RiskTier::III => RISK_CLASS_III,
        }
    }
}

pub const RISK_CLASS_I: Dimension = Dimension::new(1.0, 10.0);
pub const RISK_CLASS_IIA: Dimension = Dimension::new(5.0, 20.0);
pub const RISK_CLASS_IIB: Dimension = Dimension::new(7.0, 20.0);
pub const RISK_CLASS_III: Dimension = Dimension::new(10.0, 30.0);

pub const MEDICINAL_PRODUCT: Dimension = Dimension::new(5.0, 10.0);
pub const HUMAN_TISSUES: Dimension = Dimension::new(5.0, 10.0);
pub const ANIMAL_TISSUES: Dimension = Dimension::new(3.0, 10.0);
pub const HUMAN_PRODUCT: Dimension = Dimension::new(3.0, 10.0);
pub const ADMINISTERING_MEDICINE: Dimension = Dimension::new(3.0, 10.0);

pub const REVENUE_WEIGHT: f64 = 2e-8;
pub const REVENUE_CAP: f64 = 20.0;
pub const EMPLOYEE_WEIGHT: f64 = 0.02;
pub const EMPLOYEE_CAP: f64 = 20.0;

fn count_where(products: &[Product], flag: impl Fn(&Product) -> Option<bool>) -> usize {
    products.iter().filter(|p| flag(p).unwrap_or(false)).count()
}

/// Sum of the four capped risk-class sub-scores.
pub fn risk_class_score(products: &[Product]) -> f64 {
    [RiskTier::I, RiskTier::IIa, RiskTier::IIb, RiskTier::III]
        .iter()
        .map(|tier| {
            let count = products
                .iter()
                .filter(|p| p.risk_class.as_deref().and_then(RiskTier::from_code) == Some(*tier))
                .count();
            tier.dimension().score(count)
        })
        .sum()
}

/// Sum of the capped product-flag sub-scores.
pub fn product_flag_score(products: &[Product]) -> f64 {
    MEDICINAL_PRODUCT.score(count_where(products, |p| p.medicinal_product))
        + HUMAN_TISSUES.score(count_where(products, |p| p.human_tissues))
        + ANIMAL_TISSUES.score(count_where(products, |p| p.animal_tissues))
        + HUMAN_PRODUCT.score(count_where(products, |p| p.human_product))
        + ADMINISTERING_MEDICINE.score(count_where(products, |p| p.administering_medicine))
}

/// Revenue and headcount sub-score. The larger of the partner's and the
/// website-derived employee count is used.
pub fn firmographic_score(partner: Option<&PartnerCompany>, website_employees: i64) -> f64 {
    let revenue = partner
        .and_then(|p| p.annual_revenue)
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(0.0);
    let partner_employees = partner
        .and_then(|p| p.estimated_num_employees)
        .unwrap_or(0);
    let employees = partner_employees.max(website_employees).max(0);

    (revenue * REVENUE_WEIGHT).min(REVENUE_CAP)
        + (employees as f64 * EMPLOYEE_WEIGHT).min(EMPLOYEE_CAP)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Total ranking score, rounded to 2 decimals.
pub fn ranking_score(
    products: &[Product],
    partner: Option<&PartnerCompany>,
    website_employees: i64,
) -> f64 {
    round2(
        risk_class_score(products)
            + product_flag_score(products)
            + firmographic_score(partner, website_employees),
    )
}

/// Upper bound of [`ranking_score`].
pub fn max_score() -> f64 {
    [
        RISK_CLASS_I,
        RISK_CLASS_IIA,
        RISK_CLASS_IIB,
        RISK_CLASS_III,
        MEDICINAL_PRODUCT,
        HUMAN_TISSUES,
        ANIMAL_TISSUES,
        HUMAN_PRODUCT,
        ADMINISTERING_MEDICINE,
    ]
    .iter()
    .map(|d| d.cap)
    .sum::<f64>()
        + REVENUE_CAP
        + EMPLOYEE_CAP
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn product(risk_class: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            risk_class: Some(risk_class.to_string()),
            active: Some(true),
            manufacturer_latest_version: Some(true),
            ..Default::default()
        }
    }

    fn partner(revenue: Option<f64>, employees: Option<i64>) -> PartnerCompany {
        PartnerCompany {
            annual_revenue: revenue,
            estimated_num_employees: employees,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        assert_eq!(ranking_score(&[], None, 0), 0.00);
    }

    #[test]
    fn test_class_iii_capped_at_30() {
        let products: Vec<_> = (0..3).map(|_| product("refdata.risk-class.class-iii")).collect();
        assert_eq!(risk_class_score(&products), 30.0);

        let products: Vec<_> = (0..8).map(|_| product("refdata.risk-class.class-iii")).collect();
        assert_eq!(risk_class_score(&products), 30.0);
    }

    #[test]
    fn test_class_i_capped_at_10() {
        let products: Vec<_> = (0..12).map(|_| product("refdata.risk-class.class-i")).collect();
        assert_eq!(risk_class_score(&products), 10.0);
    }

    #[test]
    fn test_class_a_counts_as_tier_one() {
        let products = vec![
            product("refdata.risk-class.class-a"),
            product("refdata.risk-class.class-i"),
        ];
        assert_eq!(risk_class_score(&products), 2.0);
    }

    #[test]
    fn test_unknown_risk_codes_ignored() {
        let mut untyped = product("refdata.risk-class.class-b");
        untyped.risk_class = None;
        let products = vec![product("refdata.risk-class.class-b"), untyped];
        assert_eq!(ranking_score(&products, None, 0), 0.0);
    }

    #[test]
    fn test_firmographic_example() {
        let p = partner(Some(2_000_000_000.0), Some(2000));
        assert_eq!(firmographic_score(Some(&p), 500), 40.0);
    }

    #[test]
    fn test_website_employees_used_when_larger() {
        let p = partner(None, Some(100));
        // max(100, 400) * 0.02 = 8
        assert_eq!(round2(firmographic_score(Some(&p), 400)), 8.0);
        assert_eq!(round2(firmographic_score(None, 250)), 5.0);
    }

    #[test]
    fn test_product_flags() {
        let mut a = product("refdata.risk-class.class-iia");
        a.medicinal_product = Some(true);
        a.animal_tissues = Some(true);
        let mut b = product("refdata.risk-class.class-iib");
        b.medicinal_product = Some(true);
        b.human_tissues = Some(false);

        // iia 5 + iib 7 + medicinal min(2*5,10) + animal 3
        assert_eq!(ranking_score(&[a, b], None, 0), 25.0);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        let p = partner(Some(123_456_789.0), None);
        // 123456789 * 2e-8 = 2.46913578
        assert_eq!(ranking_score(&[], Some(&p), 0), 2.47);
    }

    #[test]
    fn test_max_score() {
        assert_eq!(max_score(), 170.0);
    }
}
