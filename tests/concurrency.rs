/// manual payments racing a payroll batch on the same credit
use std::collections::HashSet;
use std::thread;

use chrono::{NaiveDate, TimeZone, Utc};
use credit_ledger_rs::{
    BatchEntry, ComponentAmounts, CreditTerms, EngineConfig, LoanEngine, Money, PaymentSource, Rate,
    SafeTimeProvider, TimeSource,
};
use rust_decimal_macros::dec;

const BORROWER: &str = "1-0707-0707";
const THREADS: i64 = 8;
const PAYMENTS_PER_THREAD: i64 = 10;
const BATCH_ROWS: usize = 5;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine() -> LoanEngine {
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));
    LoanEngine::new(EngineConfig::default(), time).unwrap()
}

#[test]
fn concurrent_payments_conserve_money() {
    let engine = engine();
    let terms = CreditTerms::new(Money::from_major(60_000), Rate::from_percent(dec!(24)), 12, date(2024, 1, 15))
        .with_insurance(Money::from_major(250));
    let id = engine.register_credit(BORROWER, terms).unwrap();
    engine.generate_schedule(id).unwrap();

    // late on the first installment, so every staging also accrues moratory
    let payment_date = date(2024, 2, 20);
    let batch: Vec<BatchEntry> = (0..BATCH_ROWS)
        .map(|_| BatchEntry::new(BORROWER, Money::from_major(400)))
        .collect();

    let submitted: Money = thread::scope(|scope| {
        let manual: Vec<_> = (0..THREADS)
            .map(|t| {
                let engine = &engine;
                scope.spawn(move || {
                    let mut total = Money::ZERO;
                    for i in 0..PAYMENTS_PER_THREAD {
                        let amount = Money::from_cents(150_00 + t * 7_00 + i * 13);
                        engine
                            .apply_payment(id, amount, payment_date, PaymentSource::ManualWindow)
                            .unwrap();
                        total += amount;
                    }
                    total
                })
            })
            .collect();

        let batch_run = scope.spawn(|| engine.apply_batch(&batch, payment_date, "PLANILLA-2024-02"));

        let result = batch_run.join().unwrap();
        assert_eq!(result.success_count(), BATCH_ROWS);
        assert_eq!(result.failure_count(), 0);

        assert_eq!(result.total_applied() + result.total_surplus(), Money::from_major(400 * BATCH_ROWS as i64));

        manual.into_iter().map(|h| h.join().unwrap()).sum::<Money>() + Money::from_major(400 * BATCH_ROWS as i64)
    });

    let credit = engine.credit(id).unwrap();
    let payments = engine.payments_for_credit(id).unwrap();
    assert_eq!(payments.len(), (THREADS * PAYMENTS_PER_THREAD) as usize + BATCH_ROWS);
    assert!(credit.check_invariants().is_ok());

    // nothing lost, nothing counted twice
    let recorded: Money = payments.iter().map(|p| p.amount).sum();
    assert_eq!(recorded, submitted);
    assert!(payments.iter().all(|p| p.check_conservation().is_ok()));

    let applied_principal: Money = payments
        .iter()
        .flat_map(|p| p.details.iter())
        .map(|d| d.applied.principal)
        .sum();
    assert_eq!(applied_principal + credit.remaining_principal(), credit.terms.principal);

    // each payment's detail lines add up to what the installments show as paid
    for installment in &credit.installments {
        let mut movements = ComponentAmounts::default();
        for detail in payments
            .iter()
            .flat_map(|p| p.details.iter())
            .filter(|d| d.installment_number == installment.number)
        {
            movements.add(&detail.applied);
        }
        assert_eq!(movements, installment.paid, "installment {}", installment.number);
    }

    let sequences: HashSet<u64> = payments.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences.len(), payments.len());
    assert!(payments.windows(2).all(|w| w[0].sequence < w[1].sequence));
}
