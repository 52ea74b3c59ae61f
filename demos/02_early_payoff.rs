/// early payoff - quote inside and outside the penalty window, then cancel
use chrono::{NaiveDate, TimeZone, Utc};
use credit_ledger_rs::{CreditTerms, EngineConfig, LoanEngine, Money, Rate, SafeTimeProvider, TimeSource};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()));
    let engine = LoanEngine::new(EngineConfig::default().with_legal_moratory_uplift(), time)?;

    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let terms = CreditTerms::new(Money::from_major(800_000), Rate::from_percent(dec!(36)), 12, start)
        .with_insurance(Money::from_major(3_500));
    let credit_id = engine.register_credit("4-0444-0444", terms)?;
    engine.generate_schedule(credit_id)?;

    let early = NaiveDate::from_ymd_opt(2024, 9, 12).unwrap();
    let late = NaiveDate::from_ymd_opt(2025, 4, 12).unwrap();

    for date in [early, late] {
        let quote = engine.compute_early_payoff(credit_id, date)?;
        println!(
            "{}: principal {} overdue {} accrued {} penalty {} total {}",
            date, quote.remaining_principal, quote.overdue_charges, quote.accrued_interest, quote.penalty, quote.total
        );
    }

    let quote = engine.compute_early_payoff(credit_id, early)?;
    let payment = engine.apply_early_payoff(credit_id, quote.total, early)?;
    println!("cancelled with payment {} ({} penalty)", payment.id, payment.penalty);

    let credit = engine.credit(credit_id)?;
    println!("status {:?}, balance {}", credit.status, credit.balance);

    Ok(())
}
