/// payroll batch - one deduction file across several borrowers
use chrono::{NaiveDate, TimeZone, Utc};
use credit_ledger_rs::{
    BatchEntry, CreditTerms, EngineConfig, LoanEngine, Money, Rate, SafeTimeProvider, TimeSource,
};
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()));
    let engine = LoanEngine::new(EngineConfig::default(), time)?;
    let start = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

    // one borrower with a single credit, another holding two
    let single = engine.register_credit(
        "1-1111-0001",
        CreditTerms::new(Money::from_major(250_000), Rate::from_percent(dec!(24)), 12, start),
    )?;
    engine.generate_schedule(single)?;

    for principal in [400_000, 150_000] {
        let id = engine.register_credit(
            "2-2222-0002",
            CreditTerms::new(Money::from_major(principal), Rate::from_percent(dec!(30)), 24, start)
                .with_insurance(Money::from_major(2_000)),
        )?;
        engine.generate_schedule(id)?;
    }

    let file = vec![
        BatchEntry::new("1-1111-0001", Money::from_major(23_640)),
        BatchEntry::new("2-2222-0002", Money::from_major(60_000)),
        BatchEntry::new("3-3333-0003", Money::from_major(10_000)),
    ];

    let result = engine.apply_batch(&file, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(), "PLANILLA-2024-02");

    println!(
        "batch {}: {} applied, {} rejected",
        result.reference,
        result.success_count(),
        result.failure_count()
    );
    for row in &result.applied {
        println!(
            "  line {} {}: applied {} in {} payment(s), surplus {}",
            row.line,
            row.borrower,
            row.applied,
            row.payments.len(),
            row.surplus_amount
        );
    }
    for row in &result.rejected {
        println!("  line {} {}: {}", row.line, row.borrower, row.error);
    }

    for event in engine.take_events()? {
        println!("{:?}", event);
    }

    Ok(())
}
