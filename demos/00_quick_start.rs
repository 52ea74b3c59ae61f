/// quick start - register a credit, pay an installment, print the ledger
use chrono::{NaiveDate, TimeZone, Utc};
use credit_ledger_rs::{EngineConfig, LoanEngine, Money, PaymentSource, SafeTimeProvider, TimeSource};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));
    let engine = LoanEngine::new(EngineConfig::default(), time)?;

    // a 1,500,000 payroll credit on the default policy
    let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let credit_id =
        engine.register_credit_from_policy("1-1234-0567", "payroll_deduction", Money::from_major(1_500_000), start)?;
    let installments = engine.generate_schedule(credit_id)?;

    println!("fixed installment: {}", installments[0].scheduled_amount);
    for installment in installments.iter().take(3) {
        println!(
            "#{:>2} {}  interest {:>10}  principal {:>10}  closing {:>12}",
            installment.number,
            installment.due_date,
            installment.interest,
            installment.principal,
            installment.closing_balance
        );
    }

    // pay the first installment on its due date
    let first = &installments[0];
    let payment = engine.apply_payment(credit_id, first.scheduled_amount, first.due_date, PaymentSource::ManualWindow)?;
    println!("applied {} -> {:?}", payment.amount, payment.breakdown());

    println!("{}", engine.credit_view(credit_id)?.to_json_pretty()?);

    Ok(())
}
