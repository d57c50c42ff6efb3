use crate::infra::{InMemoryOutbox, LogDelivery};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use gigflow::clock::{Clock, ManualClock};
use gigflow::error::AppError;
use gigflow::workflows::gigs::discipline::{resolve_action, IncidentCategory};
use gigflow::workflows::gigs::{
    Caller, ExperienceLevel, GigService, HourlyRate, InMemoryMarketplaceStore, Job, JobDraft,
    Location, PaymentCapture, PaymentMethod, PenaltyOutcome, PenaltyRuleTable, Role, UserId,
};
use std::path::PathBuf;
use std::sync::Arc;

type DemoService = GigService<InMemoryMarketplaceStore, InMemoryOutbox>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Penalty rule table (JSON) to run the demo against; defaults to the built-in table.
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct RulesArgs {
    /// Penalty rule table (JSON); defaults to the built-in table.
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// Highest incident counter to resolve in the printed ladder.
    #[arg(long, default_value_t = 6)]
    pub(crate) up_to: u32,
}

/// Counter -> applied penalty label for one role and incident category.
pub(crate) fn escalation_ladder(
    table: &PenaltyRuleTable,
    role: Role,
    category: IncidentCategory,
    up_to: u32,
) -> Vec<(u32, String)> {
    (1..=up_to)
        .map(|counter| {
            let label = resolve_action(table, role, category, counter)
                .map(|action| action.applied_label())
                .unwrap_or_else(|| "none".to_string());
            (counter, label)
        })
        .collect()
}

pub(crate) fn run_rules(args: RulesArgs) -> Result<(), AppError> {
    let RulesArgs { rules, up_to } = args;
    let table = PenaltyRuleTable::load(rules.as_deref())?;

    println!(
        "Penalty rules ({})",
        rules
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "built-in".to_string())
    );
    for role in [Role::Worker, Role::Employer] {
        for (category, name) in [
            (IncidentCategory::Cancel, "cancel"),
            (IncidentCategory::NoShow, "no_show"),
        ] {
            let thresholds: Vec<String> = table
                .ladder(role, category)
                .iter()
                .map(|rule| format!("{} => {}", rule.threshold, rule.action))
                .collect();
            println!(
                "\n{}.{}: {}",
                role.label(),
                name,
                if thresholds.is_empty() {
                    "no rules".to_string()
                } else {
                    thresholds.join(", ")
                }
            );
            for (counter, label) in escalation_ladder(&table, role, category, up_to) {
                println!("  incident #{counter}: {label}");
            }
        }
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let rules = Arc::new(PenaltyRuleTable::load(args.rules.as_deref())?);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let outbox = Arc::new(InMemoryOutbox::new(Arc::new(LogDelivery)));
    let service: DemoService = GigService::new(
        Arc::new(InMemoryMarketplaceStore::new()),
        outbox.clone(),
        rules,
        clock.clone(),
    );

    let employer = service.resolve_caller(&UserId::from("emp-nile-events"), Role::Employer)?;
    let amira = service.resolve_caller(&UserId::from("wrk-amira"), Role::Worker)?;
    let karim = service.resolve_caller(&UserId::from("wrk-karim"), Role::Worker)?;
    let omar = service.resolve_caller(&UserId::from("wrk-omar"), Role::Worker)?;
    let salma = service.resolve_caller(&UserId::from("wrk-salma"), Role::Worker)?;

    let now = clock.now();
    println!("Gig lifecycle demo");

    println!("\n1. Posting and staffing");
    let evening = now + Duration::hours(48);
    let gala = post(&service, &employer, "Gala dinner waiters", evening, 2)?;
    let cloakroom = post(&service, &employer, "Cloakroom attendant", evening, 1)?;
    let setup = post(&service, &employer, "Venue setup crew", now + Duration::hours(3), 1)?;

    let mut gala_crew = Vec::new();
    for worker in [&amira, &karim] {
        let application = service.apply(worker, &gala.id)?;
        let acceptance = service.accept(&employer, &gala.id, &application.id)?;
        println!(
            "- {} accepted for {} ({}/{} slots, job {})",
            worker.user_id,
            acceptance.job.title,
            acceptance.job.accepted_workers_count,
            acceptance.job.required_workers,
            acceptance.job.status
        );
        gala_crew.push(acceptance.application);
    }
    let cloakroom_application = service.apply(&omar, &cloakroom.id)?;
    service.accept(&employer, &cloakroom.id, &cloakroom_application.id)?;
    let setup_application = service.apply(&salma, &setup.id)?;
    println!("- {} reminders queued in the outbox", outbox.pending());

    println!("\n2. Late withdrawal and employer cancellation");
    clock.advance(Duration::hours(2));
    let withdrawn = service.withdraw(
        &salma,
        &setup_application.id,
        Some("Transport strike".to_string()),
    )?;
    println!(
        "- {} withdrew from {} with 1h to go: {}",
        salma.user_id,
        setup.title,
        describe(withdrawn.penalty.as_ref())
    );
    let cancelled = service.cancel_job(&employer, &setup.id, None)?;
    println!(
        "- employer cancelled {} (payment {:?}): {}",
        cancelled.record.title,
        cancelled.record.payment.status,
        describe(cancelled.penalty.as_ref())
    );

    println!("\n3. Start, arrivals and a no-show");
    let reminders = outbox.dispatch_due(gala.start_date_time - Duration::hours(2));
    println!("- {} reminders delivered before start", reminders.sent);
    clock.set(gala.start_date_time);
    let started = service.start_due_jobs()?;
    println!("- sweep started {} job(s)", started.len());
    for application in &gala_crew {
        let arrived = service.mark_arrival(
            if application.worker_id == amira.user_id {
                &amira
            } else {
                &karim
            },
            &application.id,
        )?;
        println!("- {} checked in ({:?})", arrived.worker_id, arrived.arrival_status);
    }
    let no_show = service.mark_no_show(&employer, &cloakroom_application.id)?;
    println!(
        "- {} marked no-show: {}",
        no_show.record.worker_id,
        describe(no_show.penalty.as_ref())
    );

    println!("\n4. Two-sided completion");
    clock.set(gala.end_date_time + Duration::minutes(15));
    let job = service.confirm_completion(&employer, &gala.id)?;
    println!("- employer confirmed, job {}", job.status);
    for worker in [&amira, &karim] {
        let job = service.confirm_completion(worker, &gala.id)?;
        println!(
            "- {} confirmed ({}/{}), job {} payment {:?}",
            worker.user_id,
            job.confirmation.workers_confirmed_count,
            job.required_workers,
            job.status,
            job.payment.status
        );
    }

    println!("\n5. Discipline ledgers");
    for caller in [&employer, &omar, &salma] {
        let view = service.discipline(caller)?;
        println!(
            "- {}: cancellations {} | no-shows {} | warnings {} | {}",
            view.user_id,
            view.ledger.cancellations,
            view.ledger.no_shows,
            view.ledger.warnings,
            blocked_label(view.ledger.blocked_until, view.blocked)
        );
    }

    let tomorrow = clock.now() + Duration::hours(30);
    let next = post(&service, &employer, "Morning stocktake", tomorrow, 1)?;
    let omar = service.resolve_caller(&omar.user_id, Role::Worker)?;
    match service.apply(&omar, &next.id) {
        Ok(_) => println!("- {} applied to {}", omar.user_id, next.title),
        Err(err) => println!("- {} cannot apply to {}: {err}", omar.user_id, next.title),
    }

    Ok(())
}

fn post(
    service: &DemoService,
    employer: &Caller,
    title: &str,
    start: DateTime<Utc>,
    workers: u32,
) -> Result<Job, AppError> {
    let job = service.create_job(
        employer,
        JobDraft {
            title: title.to_string(),
            place: "Nile Ritz ballroom".to_string(),
            location: Location {
                city: "Cairo".to_string(),
                address: "1113 Corniche El Nil".to_string(),
                lat: Some(30.0459),
                lng: Some(31.2336),
            },
            start_date_time: start,
            end_date_time: start + Duration::hours(6),
            daily_work_hours: 6.0,
            required_workers: workers,
            price_per_hour: HourlyRate {
                amount: 55.0,
                currency: "EGP".to_string(),
            },
            experience_level: ExperienceLevel::None,
            details: None,
            payment_method: PaymentMethod::Card,
        },
    )?;
    let job = service.activate_job(
        employer,
        &job.id,
        PaymentCapture {
            escrow_id: format!("esc-{}", job.id),
        },
    )?;
    println!(
        "- posted {} ({}) for {} worker(s), {:.2} {} held",
        job.title,
        job.id,
        job.required_workers,
        job.payment.total_amount,
        job.price_per_hour.currency
    );
    Ok(job)
}

fn describe(penalty: Option<&PenaltyOutcome>) -> String {
    match penalty {
        Some(outcome) => format!(
            "{:?} severity, {}",
            outcome.incident.severity, outcome.penalty_applied
        ),
        None => "no penalty recorded".to_string(),
    }
}

fn blocked_label(blocked_until: Option<DateTime<Utc>>, blocked: bool) -> String {
    match blocked_until {
        Some(until) if blocked => {
            format!("blocked until {}", until.format("%Y-%m-%d %H:%M UTC"))
        }
        _ => "active".to_string(),
    }
}
