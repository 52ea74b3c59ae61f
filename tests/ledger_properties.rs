/// property tests for payment application and reversal
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use credit_ledger_rs::{
    CreditId, CreditTerms, EngineConfig, LoanEngine, Money, PaymentSource, Rate, SafeTimeProvider, TimeSource,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn engine() -> LoanEngine {
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));
    LoanEngine::new(EngineConfig::default(), time).unwrap()
}

fn credit(engine: &LoanEngine, principal: i64, rate_bps: u32, term: u32) -> CreditId {
    let terms = CreditTerms::new(
        Money::from_major(principal),
        Rate::from_percent(Decimal::new(rate_bps as i64, 2)),
        term,
        start(),
    )
    .with_insurance(Money::from_major(15));
    let id = engine.register_credit("1-0909-0808", terms).unwrap();
    engine.generate_schedule(id).unwrap();
    id
}

proptest! {
    /// principal = principal applied by live payments + principal still owed
    #[test]
    fn principal_is_conserved(
        principal in 1_000i64..500_000i64,
        rate_bps in 0u32..6_000u32,
        payments in prop::collection::vec((1i64..20_000_00i64, 0i64..400i64), 1..8),
        reverse_mask in prop::collection::vec(any::<bool>(), 8),
    ) {
        let engine = engine();
        let id = credit(&engine, principal, rate_bps, 12);

        let mut recorded = Vec::new();
        for (cents, offset) in payments {
            let date = start() + Duration::days(offset);
            let payment = engine
                .apply_payment(id, Money::from_cents(cents), date, PaymentSource::ManualWindow)
                .unwrap();
            prop_assert!(payment.check_conservation().is_ok());
            recorded.push(payment);
        }

        // reverse newest first so reversals never cross a later payment
        for (payment, reverse) in recorded.iter().rev().zip(reverse_mask) {
            if reverse {
                engine.reverse_payment(payment.id).unwrap();
            } else {
                break;
            }
        }

        let credit = engine.credit(id).unwrap();
        let live_principal: Money = engine
            .payments_for_credit(id)
            .unwrap()
            .iter()
            .filter(|p| !p.is_reversed())
            .map(|p| p.breakdown().principal)
            .sum();

        prop_assert_eq!(live_principal + credit.remaining_principal(), credit.terms.principal);
        prop_assert_eq!(credit.balance, credit.remaining_principal());
        prop_assert!(credit.check_invariants().is_ok());
    }

    /// apply followed by reverse restores the ledger exactly
    #[test]
    fn apply_then_reverse_is_identity(
        principal in 1_000i64..500_000i64,
        rate_bps in 0u32..6_000u32,
        cents in 1i64..100_000_00i64,
        offset in 0i64..200i64,
    ) {
        let engine = engine();
        let id = credit(&engine, principal, rate_bps, 6);
        let date = start() + Duration::days(offset);

        let before = engine.credit(id).unwrap();

        let payment = engine
            .apply_payment(id, Money::from_cents(cents), date, PaymentSource::ManualWindow)
            .unwrap();
        engine.reverse_payment(payment.id).unwrap();

        prop_assert_eq!(engine.credit(id).unwrap(), before);
        prop_assert!(engine.surpluses_for(&"1-0909-0808".into()).unwrap().is_empty());
    }

    /// a payment below the moratory owed never reaches principal
    #[test]
    fn moratory_absorbs_small_payments(
        principal in 50_000i64..500_000i64,
        days_late in 30i64..120i64,
        fraction in 1u32..100u32,
    ) {
        let engine = engine();
        let id = credit(&engine, principal, 3_600, 12);
        let first_due = engine.credit(id).unwrap().installment(1).unwrap().due_date;
        let date = first_due + Duration::days(days_late);

        engine.accrue_moratory(id, date).unwrap();
        let moratory = engine.credit(id).unwrap().installment(1).unwrap().moratory_interest;
        prop_assume!(moratory > Money::CENT);

        let amount = Money::from_decimal(moratory.as_decimal() * Decimal::from(fraction) / Decimal::from(100))
            .max(Money::CENT)
            .min(moratory);
        let payment = engine.apply_payment(id, amount, date, PaymentSource::ManualWindow).unwrap();
        let breakdown = payment.breakdown();

        prop_assert_eq!(breakdown.moratory_interest, amount);
        prop_assert_eq!(breakdown.principal, Money::ZERO);
        prop_assert_eq!(payment.details.len(), 1);
    }
}
