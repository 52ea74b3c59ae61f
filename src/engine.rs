use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::accounting::{AccountingDispatcher, AccountingSink, DispatchOutcome, JournalEntry};
use crate::config::{CreditTerms, EngineConfig};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::interest::AccrualReport;
use crate::ledger::{Credit, Installment};
use crate::payments::batch::{group_by_borrower, period_end};
use crate::payments::{
    AllocationScope, AmortizationSchedule, AppliedEntry, BatchEntry, BatchResult, CreditFailure, EarlyPayoffCalculator,
    InstallmentAdjustment, InstallmentState, Allocation, Payment, PaymentProcessor, PaymentRequest, PayoffBreakdown, RejectedEntry,
    ReversalEngine, SurplusBalance, SurplusLedger, SurplusLink,
};
use crate::types::{BorrowerId, CreditId, CreditStatus, PaymentId, PaymentSource, SurplusId};
use crate::views::CreditView;

/// what happens to money left over after the waterfall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residual {
    /// becomes a surplus tied to the credit and the payment
    CreditSurplus,
    /// handed back to the caller
    ReturnToCaller,
}

/// a payment ready to be committed together with its staged credit
struct PaymentDraft {
    request: PaymentRequest,
    allocation: Allocation,
    adjustments: Vec<InstallmentAdjustment>,
    penalty: Money,
    residual: Residual,
    funded_by_surplus: Option<SurplusId>,
    batch_reference: Option<String>,
}

impl PaymentDraft {
    fn new(request: PaymentRequest, allocation: Allocation, residual: Residual) -> Self {
        Self {
            request,
            allocation,
            adjustments: Vec::new(),
            penalty: Money::ZERO,
            residual,
            funded_by_surplus: None,
            batch_reference: None,
        }
    }
}

/// outcome of applying money to one credit
struct Applied {
    payment: Option<Payment>,
    residual: Money,
}

/// credit ledger engine
///
/// every credit sits behind its own mutex; lock order is
/// credit -> payments -> surpluses -> events, and the credit map lock is
/// never held while waiting on a credit
pub struct LoanEngine {
    config: EngineConfig,
    time: SafeTimeProvider,
    processor: PaymentProcessor,
    reversal: ReversalEngine,
    payoff: EarlyPayoffCalculator,
    credits: RwLock<HashMap<CreditId, Arc<Mutex<Credit>>>>,
    borrowers: RwLock<HashMap<BorrowerId, Vec<CreditId>>>,
    payments: Mutex<HashMap<PaymentId, Payment>>,
    surpluses: Mutex<SurplusLedger>,
    events: Mutex<EventStore>,
    accounting: AccountingDispatcher,
}

impl LoanEngine {
    pub fn new(config: EngineConfig, time: SafeTimeProvider) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            processor: PaymentProcessor::new(&config.moratory),
            reversal: ReversalEngine::new(),
            payoff: EarlyPayoffCalculator::new(config.prepayment_penalty.clone()),
            config,
            time,
            credits: RwLock::new(HashMap::new()),
            borrowers: RwLock::new(HashMap::new()),
            payments: Mutex::new(HashMap::new()),
            surpluses: Mutex::new(SurplusLedger::new()),
            events: Mutex::new(EventStore::new()),
            accounting: AccountingDispatcher::disabled(),
        })
    }

    /// post journal entries to `sink` on the given runtime, unless accounting
    /// is switched off in the configuration
    pub fn with_accounting(mut self, sink: Arc<dyn AccountingSink>, runtime: Handle) -> Self {
        if self.config.accounting.enabled {
            self.accounting = AccountingDispatcher::new(sink, runtime, self.config.accounting.timeout());
        } else {
            warn!("accounting disabled in configuration, sink ignored");
        }
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // registration

    /// register a credit awaiting formalization
    pub fn register_credit(&self, borrower: impl Into<BorrowerId>, terms: CreditTerms) -> Result<CreditId> {
        terms.validate()?;

        let credit = Credit::new(borrower.into(), terms, self.time.now());
        let credit_id = credit.id;
        let event = Event::CreditRegistered {
            credit_id,
            borrower: credit.borrower.clone(),
            principal: credit.terms.principal,
            timestamp: credit.registered_at,
        };

        self.insert_credit(credit)?;
        self.events.lock()?.emit(event);

        info!(credit_id = %credit_id, "credit registered");
        Ok(credit_id)
    }

    /// register a credit with rate, term and insurance from the policy table
    pub fn register_credit_from_policy(
        &self,
        borrower: impl Into<BorrowerId>,
        credit_type: &str,
        principal: Money,
        start_date: NaiveDate,
    ) -> Result<CreditId> {
        let policy = self.config.policies.lookup(credit_type)?;
        let terms = CreditTerms::from_policy(policy, principal, start_date);
        self.register_credit(borrower, terms)
    }

    /// formalize a pending credit; a formalized credit returns its persisted plan
    pub fn generate_schedule(&self, credit_id: CreditId) -> Result<Vec<Installment>> {
        let handle = self.credit_handle(credit_id)?;
        let mut credit = handle.lock()?;

        if credit.status != CreditStatus::Pending {
            return Ok(credit.installments.clone());
        }

        let schedule = AmortizationSchedule::generate(&credit.terms)?;
        let now = self.time.now();

        let mut staged = credit.clone();
        formalize(&mut staged, &schedule, now);
        staged.check_invariants()?;

        let events = vec![
            Event::ScheduleGenerated {
                credit_id,
                installments: schedule.term_months,
                fixed_installment: schedule.fixed_payment,
                total_interest: schedule.total_interest,
                timestamp: now,
            },
            Event::CreditStatusChanged {
                credit_id,
                old_status: credit.status,
                new_status: staged.status,
                reason: "formalized".to_string(),
                timestamp: now,
            },
        ];

        *credit = staged;
        self.events.lock()?.extend(events);

        info!(
            credit_id = %credit_id,
            installments = schedule.term_months,
            fixed_installment = %schedule.fixed_payment,
            "schedule generated"
        );
        Ok(credit.installments.clone())
    }

    // accrual

    /// evaluate lateness and moratory interest as of `evaluation_date`
    pub fn accrue_moratory(&self, credit_id: CreditId, evaluation_date: NaiveDate) -> Result<AccrualReport> {
        let handle = self.credit_handle(credit_id)?;
        let mut credit = handle.lock()?;
        credit.ensure_active()?;

        let mut staged = credit.clone();
        let report = self.processor.moratory().accrue(&mut staged, evaluation_date);
        staged.recompute_balance();
        staged.check_invariants()?;

        let mut events = transition_events(&credit, &staged, "moratory accrual", self.time.now());
        if !report.lines.is_empty() {
            events.insert(
                0,
                Event::MoratoryAccrued {
                    credit_id,
                    evaluation_date,
                    installments_late: report.lines.len() as u32,
                    total_moratory: report.total_moratory(),
                },
            );
        }

        *credit = staged;
        self.events.lock()?.extend(events);

        debug!(
            credit_id = %credit_id,
            date = %evaluation_date,
            late = report.lines.len(),
            moratory = %report.total_moratory(),
            "moratory accrued"
        );
        Ok(report)
    }

    // payments

    /// apply a payment through the waterfall; any excess becomes a surplus
    pub fn apply_payment(
        &self,
        credit_id: CreditId,
        amount: Money,
        payment_date: NaiveDate,
        source: PaymentSource,
    ) -> Result<Payment> {
        let request = PaymentRequest::new(credit_id, amount, payment_date, source);
        let applied = self.apply_request(request, Residual::CreditSurplus, None)?;

        applied
            .payment
            .ok_or_else(|| LedgerError::invariant("payment with surplus residual was not recorded"))
    }

    /// apply a payroll file; each row succeeds or fails on its own
    pub fn apply_batch(&self, entries: &[BatchEntry], batch_date: NaiveDate, reference: &str) -> BatchResult {
        let groups = group_by_borrower(entries);
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let chunk_size = groups.len().div_ceil(workers).max(1);

        let mut outcomes: Vec<(usize, std::result::Result<AppliedEntry, RejectedEntry>)> = thread::scope(|scope| {
            let handles: Vec<_> = groups
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move || {
                        chunk
                            .iter()
                            .flat_map(|(_, rows)| rows.iter())
                            .map(|(line, entry)| (*line, self.apply_batch_row(*line, entry, batch_date, reference)))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(chunk, handle)| match handle.join() {
                    Ok(results) => results,
                    Err(_) => {
                        error!(reference, "batch worker panicked");
                        chunk
                            .iter()
                            .flat_map(|(_, rows)| rows.iter())
                            .map(|(line, entry)| {
                                (
                                    *line,
                                    Err(RejectedEntry {
                                        line: *line,
                                        borrower: entry.borrower.clone(),
                                        amount: entry.amount,
                                        error: LedgerError::invariant("batch worker panicked"),
                                    }),
                                )
                            })
                            .collect()
                    }
                })
                .collect()
        });
        outcomes.sort_by_key(|(line, _)| *line);

        let mut result = BatchResult {
            reference: reference.to_string(),
            applied: Vec::new(),
            rejected: Vec::new(),
        };
        for (_, outcome) in outcomes {
            match outcome {
                Ok(applied) => result.applied.push(applied),
                Err(rejected) => result.rejected.push(rejected),
            }
        }

        let event = Event::BatchProcessed {
            reference: reference.to_string(),
            applied: result.success_count() as u32,
            rejected: result.failure_count() as u32,
            total_applied: result.total_applied(),
            timestamp: self.time.now(),
        };
        match self.events.lock() {
            Ok(mut store) => store.emit(event),
            Err(_) => warn!(reference, "event store poisoned, batch event dropped"),
        }

        info!(
            reference,
            applied = result.success_count(),
            rejected = result.failure_count(),
            total = %result.total_applied(),
            "payroll batch processed"
        );
        result
    }

    fn apply_batch_row(
        &self,
        line: usize,
        entry: &BatchEntry,
        batch_date: NaiveDate,
        reference: &str,
    ) -> std::result::Result<AppliedEntry, RejectedEntry> {
        self.apply_batch_entry(line, entry, batch_date, reference).map_err(|error| {
            warn!(line, borrower = %entry.borrower, error = %error, "batch entry rejected");
            RejectedEntry {
                line,
                borrower: entry.borrower.clone(),
                amount: entry.amount,
                error,
            }
        })
    }

    fn apply_batch_entry(
        &self,
        line: usize,
        entry: &BatchEntry,
        batch_date: NaiveDate,
        reference: &str,
    ) -> Result<AppliedEntry> {
        if !entry.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount: entry.amount });
        }

        let active = self.active_credits(&entry.borrower)?;
        if active.is_empty() {
            return Err(LedgerError::UnresolvedBorrower {
                borrower: entry.borrower.clone(),
            });
        }

        let mut applied_entry = AppliedEntry {
            line,
            borrower: entry.borrower.clone(),
            amount: entry.amount,
            payments: Vec::new(),
            applied: Money::ZERO,
            surplus: None,
            surplus_amount: Money::ZERO,
            failures: Vec::new(),
        };

        if let [credit_id] = active.as_slice() {
            let request = PaymentRequest::new(*credit_id, entry.amount, batch_date, PaymentSource::PayrollBatch);
            let applied = self.apply_request(request, Residual::CreditSurplus, Some(reference))?;
            if let Some(payment) = applied.payment {
                applied_entry.applied = payment.applied_total();
                applied_entry.surplus = payment.surplus.map(|s| s.surplus_id);
                applied_entry.surplus_amount = payment.surplus_amount();
                applied_entry.payments.push(payment.id);
            }
            return Ok(applied_entry);
        }

        // several credits: settle the period on each, oldest formalized first
        let mut remaining = entry.amount;
        let scope = AllocationScope::DueThrough(period_end(batch_date));
        for credit_id in active {
            if !remaining.is_positive() {
                break;
            }
            let request =
                PaymentRequest::new(credit_id, remaining, batch_date, PaymentSource::PayrollBatch).with_scope(scope);
            // earlier credits may already be committed; a failure here must not hide them
            let applied = match self.apply_request(request, Residual::ReturnToCaller, Some(reference)) {
                Ok(applied) => applied,
                Err(LedgerError::CreditNotActive { .. }) => continue,
                Err(error) => {
                    warn!(line, credit_id = %credit_id, error = %error, "batch entry skipped a credit");
                    applied_entry.failures.push(CreditFailure { credit_id, error });
                    continue;
                }
            };
            if let Some(payment) = applied.payment {
                applied_entry.applied += payment.applied_total();
                applied_entry.payments.push(payment.id);
            }
            remaining = applied.residual;
        }

        if applied_entry.payments.is_empty() {
            if let Some(failure) = applied_entry.failures.first() {
                return Err(failure.error.clone());
            }
        }

        if remaining.is_positive() {
            let balance = SurplusBalance::new(
                entry.borrower.clone(),
                None,
                remaining,
                Some(reference.to_string()),
                self.time.now(),
            );
            applied_entry.surplus = Some(self.store_surplus(balance)?);
            applied_entry.surplus_amount = remaining;
        }

        Ok(applied_entry)
    }

    // early payoff

    /// payoff amount as of `payoff_date`; the ledger is not modified
    pub fn compute_early_payoff(&self, credit_id: CreditId, payoff_date: NaiveDate) -> Result<PayoffBreakdown> {
        let handle = self.credit_handle(credit_id)?;
        let credit = handle.lock()?;
        credit.ensure_active()?;

        let mut staged = credit.clone();
        drop(credit);

        self.processor.moratory().accrue(&mut staged, payoff_date);
        self.payoff.compute(&staged, payoff_date)
    }

    /// cancel the credit before term
    pub fn apply_early_payoff(&self, credit_id: CreditId, amount: Money, payoff_date: NaiveDate) -> Result<Payment> {
        let request = PaymentRequest::new(credit_id, amount, payoff_date, PaymentSource::EarlyPayoff);
        request.validate()?;

        let handle = self.credit_handle(credit_id)?;
        let (payment, breakdown) = {
            let mut credit = handle.lock()?;
            credit.ensure_active()?;

            let mut staged = credit.clone();
            self.processor.moratory().accrue(&mut staged, payoff_date);
            let breakdown = self.payoff.compute(&staged, payoff_date)?;
            if amount < breakdown.total {
                return Err(LedgerError::InsufficientPayoff {
                    required: breakdown.total,
                    provided: amount,
                });
            }

            let adjustments = self.payoff.reprice(&mut staged, &breakdown);
            let allocation = self.processor.waterfall().allocate(
                &mut staged.installments,
                amount - breakdown.penalty,
                AllocationScope::AllPayable,
            );

            staged.status = CreditStatus::Cancelled;
            staged.recompute_balance();
            staged.check_invariants()?;
            if !staged.total_outstanding().is_zero() {
                return Err(LedgerError::invariant(format!(
                    "payoff left {} outstanding on credit {}",
                    staged.total_outstanding(),
                    credit_id
                )));
            }

            let mut draft = PaymentDraft::new(request, allocation, Residual::CreditSurplus);
            draft.adjustments = adjustments;
            draft.penalty = breakdown.penalty;

            let payment = self.record_payment(&mut credit, staged, draft)?;
            (payment, breakdown)
        };

        self.events.lock()?.emit(Event::CreditCancelled {
            credit_id,
            payment_id: payment.id,
            penalty: breakdown.penalty,
            timestamp: payment.recorded_at,
        });
        self.post_payment(&payment);

        info!(
            credit_id = %credit_id,
            payment_id = %payment.id,
            total = %breakdown.total,
            penalty = %breakdown.penalty,
            "credit cancelled by early payoff"
        );
        Ok(payment)
    }

    // reversal

    /// undo a payment, restoring the ledger exactly as it was before it
    pub fn reverse_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.payment(payment_id)?;
        if payment.is_reversed() {
            return Err(LedgerError::AlreadyReversed { payment_id });
        }

        let handle = self.credit_handle(payment.credit_id)?;
        let reversed = {
            let mut credit = handle.lock()?;
            let staged = self.reversal.stage(&credit, &payment)?;

            let mut payments = self.payments.lock()?;
            let mut surpluses = self.surpluses.lock()?;
            let mut events = self.events.lock()?;

            let record = payments
                .get_mut(&payment_id)
                .ok_or(LedgerError::PaymentNotFound { id: payment_id })?;
            if record.is_reversed() {
                return Err(LedgerError::AlreadyReversed { payment_id });
            }

            // validate surplus effects before touching anything
            if let Some(link) = record.surplus {
                if surpluses.get(link.surplus_id)?.has_consumptions() {
                    return Err(LedgerError::SurplusAlreadyConsumed {
                        surplus_id: link.surplus_id,
                    });
                }
            }
            if let Some(source_id) = record.funded_by_surplus {
                let funded = surpluses
                    .get(source_id)?
                    .consumptions
                    .iter()
                    .any(|c| c.payment_id == payment_id);
                if !funded {
                    return Err(LedgerError::invariant(format!(
                        "surplus {} has no record of payment {}",
                        source_id, payment_id
                    )));
                }
            }

            let now = self.time.now();
            let mut new_events = transition_events(&credit, &staged, "payment reversed", now);

            if let Some(link) = record.surplus {
                surpluses.remove_unconsumed(link.surplus_id)?;
                new_events.push(Event::SurplusReleased {
                    surplus_id: link.surplus_id,
                    amount: link.amount,
                    timestamp: now,
                });
            }
            if let Some(source_id) = record.funded_by_surplus {
                surpluses.get_mut(source_id)?.restore(payment_id)?;
            }

            record.reversed_at = Some(now);
            new_events.push(Event::PaymentReversed {
                credit_id: staged.id,
                payment_id,
                amount: record.amount,
                new_balance: staged.balance,
                timestamp: now,
            });

            *credit = staged;
            events.extend(new_events);
            record.clone()
        };

        let collected = reversed.collected();
        if collected.is_positive() {
            let date = reversed.reversed_at.map_or(reversed.applied_date, |at| at.date_naive());
            self.accounting
                .dispatch(JournalEntry::for_reversal(&reversed, &self.config.accounting, date));
        }

        info!(
            credit_id = %reversed.credit_id,
            payment_id = %payment_id,
            amount = %reversed.amount,
            "payment reversed"
        );
        Ok(reversed)
    }

    // surplus

    /// apply a surplus balance to one installment; returns the payment and what is left
    pub fn assign_surplus(
        &self,
        surplus_id: SurplusId,
        credit_id: CreditId,
        installment_number: u32,
        date: NaiveDate,
    ) -> Result<(Payment, SurplusBalance)> {
        let surplus = self.surpluses.lock()?.get(surplus_id)?.clone();
        if surplus.is_exhausted() {
            return Err(LedgerError::InvalidPaymentAmount { amount: surplus.amount });
        }

        let handle = self.credit_handle(credit_id)?;
        let payment = {
            let mut credit = handle.lock()?;
            if credit.borrower != surplus.borrower {
                return Err(LedgerError::SurplusBorrowerMismatch {
                    surplus_id,
                    owner: surplus.borrower.clone(),
                    requested: credit.borrower.clone(),
                });
            }
            credit.ensure_active()?;
            credit.installment(installment_number)?;

            let request = PaymentRequest::new(credit_id, surplus.amount, date, PaymentSource::Extraordinary)
                .with_scope(AllocationScope::Installment(installment_number));
            let staged = self.processor.stage(&credit, &request)?;

            if staged.allocation.applied_total().is_zero() {
                return Err(LedgerError::InstallmentNotPayable {
                    number: installment_number,
                    status: staged.credit.installment(installment_number)?.status,
                });
            }

            let mut draft = PaymentDraft::new(request, staged.allocation, Residual::ReturnToCaller);
            draft.funded_by_surplus = Some(surplus_id);
            self.record_payment(&mut credit, staged.credit, draft)?
        };

        self.post_payment(&payment);
        let remaining = self.surpluses.lock()?.get(surplus_id)?.clone();

        info!(
            surplus_id = %surplus_id,
            credit_id = %credit_id,
            installment = installment_number,
            applied = %payment.applied_total(),
            remaining = %remaining.amount,
            "surplus assigned"
        );
        Ok((payment, remaining))
    }

    // refinancing

    /// close a credit into a new one carrying its balance plus fresh principal
    pub fn refinance(
        &self,
        credit_id: CreditId,
        additional_principal: Money,
        annual_rate: Rate,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Result<CreditId> {
        if additional_principal.is_negative() {
            return Err(LedgerError::schedule_input("additional principal cannot be negative"));
        }

        let handle = self.credit_handle(credit_id)?;
        let mut old = handle.lock()?;
        old.ensure_active()?;

        let mut terms = CreditTerms::new(old.balance + additional_principal, annual_rate, term_months, start_date)
            .with_insurance(old.terms.monthly_insurance);
        terms.day_count = old.terms.day_count;
        let schedule = AmortizationSchedule::generate(&terms)?;

        let now = self.time.now();
        let mut new_credit = Credit::new(old.borrower.clone(), terms, now);
        formalize(&mut new_credit, &schedule, now);
        new_credit.refinanced_from = Some(credit_id);
        new_credit.check_invariants()?;
        let new_id = new_credit.id;

        let events = vec![
            Event::CreditRegistered {
                credit_id: new_id,
                borrower: new_credit.borrower.clone(),
                principal: new_credit.terms.principal,
                timestamp: now,
            },
            Event::ScheduleGenerated {
                credit_id: new_id,
                installments: schedule.term_months,
                fixed_installment: schedule.fixed_payment,
                total_interest: schedule.total_interest,
                timestamp: now,
            },
            Event::CreditRefinanced {
                credit_id,
                new_credit_id: new_id,
                carried_balance: old.balance,
                timestamp: now,
            },
            Event::CreditStatusChanged {
                credit_id,
                old_status: old.status,
                new_status: CreditStatus::Refinanced,
                reason: format!("refinanced into {}", new_id),
                timestamp: now,
            },
        ];

        self.insert_credit(new_credit)?;
        old.status = CreditStatus::Refinanced;
        old.refinanced_into = Some(new_id);
        self.events.lock()?.extend(events);

        info!(
            credit_id = %credit_id,
            new_credit_id = %new_id,
            carried_balance = %old.balance,
            "credit refinanced"
        );
        Ok(new_id)
    }

    // queries

    /// snapshot of a credit
    pub fn credit(&self, credit_id: CreditId) -> Result<Credit> {
        let handle = self.credit_handle(credit_id)?;
        let credit = handle.lock()?;
        Ok(credit.clone())
    }

    pub fn credit_view(&self, credit_id: CreditId) -> Result<CreditView> {
        Ok(CreditView::from_credit(&self.credit(credit_id)?))
    }

    pub fn credits_for(&self, borrower: &BorrowerId) -> Result<Vec<CreditId>> {
        Ok(self.borrowers.read()?.get(borrower).cloned().unwrap_or_default())
    }

    pub fn payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.payments
            .lock()?
            .get(&payment_id)
            .cloned()
            .ok_or(LedgerError::PaymentNotFound { id: payment_id })
    }

    /// payments recorded against a credit, oldest first
    pub fn payments_for_credit(&self, credit_id: CreditId) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .lock()?
            .values()
            .filter(|p| p.credit_id == credit_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.sequence);
        Ok(payments)
    }

    pub fn surplus(&self, surplus_id: SurplusId) -> Result<SurplusBalance> {
        Ok(self.surpluses.lock()?.get(surplus_id)?.clone())
    }

    pub fn surpluses_for(&self, borrower: &BorrowerId) -> Result<Vec<SurplusBalance>> {
        Ok(self.surpluses.lock()?.for_borrower(borrower))
    }

    pub fn take_events(&self) -> Result<Vec<Event>> {
        Ok(self.events.lock()?.take_events())
    }

    /// wait for outstanding journal deliveries
    pub async fn flush_accounting(&self) -> Vec<DispatchOutcome> {
        self.accounting.flush().await
    }

    // internals

    fn credit_handle(&self, credit_id: CreditId) -> Result<Arc<Mutex<Credit>>> {
        self.credits
            .read()?
            .get(&credit_id)
            .cloned()
            .ok_or(LedgerError::CreditNotFound { id: credit_id })
    }

    fn insert_credit(&self, credit: Credit) -> Result<()> {
        let credit_id = credit.id;
        let borrower = credit.borrower.clone();
        self.credits.write()?.insert(credit_id, Arc::new(Mutex::new(credit)));
        self.borrowers.write()?.entry(borrower).or_default().push(credit_id);
        Ok(())
    }

    /// formalized credits of a borrower, oldest formalization first
    fn active_credits(&self, borrower: &BorrowerId) -> Result<Vec<CreditId>> {
        let ids = self.credits_for(borrower)?;
        let mut active: Vec<(NaiveDate, DateTime<Utc>, CreditId)> = Vec::new();
        for id in ids {
            let handle = self.credit_handle(id)?;
            // a poisoned credit is still listed; applying to it reports the failure
            let credit = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if credit.is_active() {
                active.push((
                    credit.terms.start_date,
                    credit.formalized_at.unwrap_or(credit.registered_at),
                    id,
                ));
            }
        }
        active.sort();
        Ok(active.into_iter().map(|(_, _, id)| id).collect())
    }

    fn store_surplus(&self, balance: SurplusBalance) -> Result<SurplusId> {
        let event = Event::SurplusCreated {
            surplus_id: balance.id,
            borrower: balance.borrower.clone(),
            credit_id: balance.credit_id,
            amount: balance.amount,
            timestamp: balance.created_at,
        };
        let id = self.surpluses.lock()?.insert(balance);
        self.events.lock()?.emit(event);
        Ok(id)
    }

    /// stage, commit and report one payment against a credit
    fn apply_request(
        &self,
        request: PaymentRequest,
        residual: Residual,
        batch_reference: Option<&str>,
    ) -> Result<Applied> {
        let handle = self.credit_handle(request.credit_id)?;

        let applied = {
            let mut credit = handle.lock()?;
            let staged = self.processor.stage(&credit, &request)?;
            let leftover = staged.allocation.residual;

            if staged.allocation.lines.is_empty() && residual == Residual::ReturnToCaller {
                // nothing applied; keep the accrual, record no payment
                let events = transition_events(&credit, &staged.credit, "moratory accrual", self.time.now());
                *credit = staged.credit;
                self.events.lock()?.extend(events);
                return Ok(Applied {
                    payment: None,
                    residual: leftover,
                });
            }

            let mut draft = PaymentDraft::new(request, staged.allocation, residual);
            draft.batch_reference = batch_reference.map(str::to_string);
            let payment = self.record_payment(&mut credit, staged.credit, draft)?;

            Applied {
                residual: if residual == Residual::ReturnToCaller {
                    leftover
                } else {
                    Money::ZERO
                },
                payment: Some(payment),
            }
        };

        if let Some(payment) = &applied.payment {
            self.post_payment(payment);
            info!(
                credit_id = %payment.credit_id,
                payment_id = %payment.id,
                source = ?payment.source,
                amount = %payment.amount,
                applied = %payment.applied_total(),
                surplus = %payment.surplus_amount(),
                "payment applied"
            );
        }
        Ok(applied)
    }

    /// commit a staged credit with its payment record; the caller holds the credit lock
    fn record_payment(&self, credit: &mut Credit, staged: Credit, draft: PaymentDraft) -> Result<Payment> {
        let now = self.time.now();
        let payment_id = Uuid::new_v4();
        let collected = draft.allocation.applied_total() + draft.penalty;

        let surplus = match draft.residual {
            Residual::CreditSurplus if draft.allocation.residual.is_positive() => {
                let mut balance = SurplusBalance::new(
                    credit.borrower.clone(),
                    Some(credit.id),
                    draft.allocation.residual,
                    draft.batch_reference.clone(),
                    now,
                );
                balance.origin_payment = Some(payment_id);
                Some(balance)
            }
            _ => None,
        };
        let surplus_link = surplus.as_ref().map(|b| SurplusLink {
            surplus_id: b.id,
            amount: b.amount,
        });

        let mut payment = Payment {
            id: payment_id,
            sequence: 0,
            credit_id: credit.id,
            borrower: credit.borrower.clone(),
            source: draft.request.source,
            amount: collected + surplus_link.map_or(Money::ZERO, |s| s.amount),
            applied_date: draft.request.payment_date,
            recorded_at: now,
            details: draft.allocation.lines.clone(),
            adjustments: draft.adjustments,
            prior_states: InstallmentState::changed(credit, &staged),
            penalty: draft.penalty,
            surplus: surplus_link,
            funded_by_surplus: draft.funded_by_surplus,
            credit_status_before: credit.status,
            credit_status_after: staged.status,
            batch_reference: draft.batch_reference,
            reversed_at: None,
        };
        payment.check_conservation()?;

        let mut new_events = transition_events(credit, &staged, "payment applied", now);
        new_events.push(Event::PaymentApplied {
            credit_id: credit.id,
            payment_id,
            source: payment.source,
            amount: payment.amount,
            applied: draft.allocation.breakdown(),
            new_balance: staged.balance,
            timestamp: now,
        });

        let mut payments = self.payments.lock()?;
        let mut surpluses = self.surpluses.lock()?;
        let mut events = self.events.lock()?;

        // payments are never removed, so the count orders them
        payment.sequence = payments.len() as u64 + 1;

        if let Some(source_id) = draft.funded_by_surplus {
            let source = surpluses.get_mut(source_id)?;
            if source.amount < collected {
                return Err(LedgerError::invariant(format!(
                    "surplus {} holds {} but {} was applied",
                    source_id, source.amount, collected
                )));
            }
            source.consume(collected, payment_id, now);
            new_events.push(Event::SurplusAssigned {
                surplus_id: source_id,
                credit_id: credit.id,
                installment_number: payment.details.first().map_or(0, |d| d.installment_number),
                amount: collected,
                remaining: source.amount,
                timestamp: now,
            });
        }

        if let Some(balance) = surplus {
            new_events.push(Event::SurplusCreated {
                surplus_id: balance.id,
                borrower: balance.borrower.clone(),
                credit_id: balance.credit_id,
                amount: balance.amount,
                timestamp: now,
            });
            surpluses.insert(balance);
        }

        payments.insert(payment_id, payment.clone());
        *credit = staged;
        events.extend(new_events);

        Ok(payment)
    }

    /// hand the journal entry to the dispatcher; the ledger is already committed
    fn post_payment(&self, payment: &Payment) {
        if payment.collected().is_positive() {
            self.accounting
                .dispatch(JournalEntry::for_payment(payment, &self.config.accounting));
        }
    }
}

/// persist a generated plan on a credit and open it for payments
fn formalize(credit: &mut Credit, schedule: &AmortizationSchedule, now: DateTime<Utc>) {
    credit.installments = schedule.installments.iter().map(Installment::from_scheduled).collect();
    credit.fixed_installment = schedule.fixed_payment;
    credit.status = CreditStatus::Formalized;
    credit.formalized_at = Some(now);
    credit.recompute_balance();
}

/// status changes between two versions of a credit
fn transition_events(before: &Credit, after: &Credit, reason: &str, now: DateTime<Utc>) -> Vec<Event> {
    let mut events: Vec<Event> = before
        .installments
        .iter()
        .zip(after.installments.iter())
        .filter(|(old, new)| old.status != new.status)
        .map(|(old, new)| Event::InstallmentStatusChanged {
            credit_id: after.id,
            installment_number: new.number,
            old_status: old.status,
            new_status: new.status,
        })
        .collect();

    if before.status != after.status {
        events.push(Event::CreditStatusChanged {
            credit_id: after.id,
            old_status: before.status,
            new_status: after.status,
            reason: reason.to_string(),
            timestamp: now,
        });
    }
    events
}
