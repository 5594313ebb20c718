use crate::infra::{in_memory_backend, InMemoryBackend};
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Args;
use hireflow::audit::AuditQuery;
use hireflow::config::WorkflowConfig;
use hireflow::error::AppError;
use hireflow::ids::{CandidateId, OrganizationId, UserId};
use hireflow::integrations::{ProviderStatus, ScriptedProvider};
use hireflow::workflows::application::{self, Application, NewApplication};
use hireflow::workflows::approval::{self, ApprovalParent};
use hireflow::workflows::everify::{self, EVerifyCase};
use hireflow::workflows::hiring_decision::{self, Decision, NewHiringDecision};
use hireflow::workflows::i9::{
    self, CitizenshipStatus, I9Verification, NewI9Verification, Section1,
};
use hireflow::workflows::job::{self, Job, NewJob};
use hireflow::workflows::offer::{self, NewOffer, Offer};
use hireflow::{fire, Clock, FixedClock, TenantContext, WorkflowStore};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Day the requisition is opened (YYYY-MM-DD). Defaults to 2025-01-06.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) opened_on: Option<NaiveDate>,
    /// Have E-Verify return a tentative non-confirmation before authorizing.
    #[arg(long)]
    pub(crate) tnc: bool,
    /// Print every audit entry written during the run.
    #[arg(long)]
    pub(crate) show_audit: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let opened_on = args
        .opened_on
        .or_else(|| NaiveDate::from_ymd_opt(2025, 1, 6))
        .ok_or_else(|| AppError::BadRequest("invalid default demo date".to_string()))?;
    let opened_at = Utc.from_utc_datetime(&opened_on.and_time(NaiveTime::MIN)) + Duration::hours(9);

    let clock = Arc::new(FixedClock::new(opened_at));
    let InMemoryBackend {
        store,
        audit,
        dispatch,
    } = in_memory_backend(clock.clone(), WorkflowConfig::default());

    let organization_id = OrganizationId::new();
    let recruiter = TenantContext::for_actor(organization_id, UserId::new())
        .with_request_id("demo-recruiter");
    let finance_id = UserId::new();
    let finance = TenantContext::for_actor(organization_id, finance_id)
        .with_request_id("demo-finance");

    println!("Hiring workflow demo (opened {opened_on})");

    let job = store.transaction(&recruiter, |uow| {
        let job = job::create(
            uow,
            NewJob {
                title: "Backend Engineer".to_string(),
                department: Some("Platform".to_string()),
                hiring_manager_id: recruiter.actor_id(),
                headcount: 1,
            },
        )?;
        job::submit_for_approval(uow, job.id, &[finance_id])?;
        Ok(job)
    })?;
    approve_round(&store, &finance, ApprovalParent::Job(job.id))?;
    println!(
        "- Requisition '{}' -> {}",
        job.title,
        store.load::<Job>(&recruiter, job.id)?.status()
    );

    clock.advance(Duration::days(1));
    let application = store.transaction(&recruiter, |uow| {
        let application = application::create(
            uow,
            NewApplication {
                job_id: job.id,
                candidate_id: CandidateId::new(),
                source: Some("referral".to_string()),
            },
        )?;
        for event in [
            "advance_to_screening",
            "advance_to_interviewing",
            "advance_to_background_check",
        ] {
            fire::<Application>(uow, application.id, event)?;
        }
        Ok(application)
    })?;
    println!(
        "- Application {} -> {}",
        application.id,
        store
            .load::<Application>(&recruiter, application.id)?
            .status()
    );

    let start_date = opened_on + Duration::days(14);
    let offer = store.transaction(&recruiter, |uow| {
        let offer = offer::create(
            uow,
            NewOffer {
                application_id: application.id,
                salary: 145_000,
                start_date: Some(start_date),
                expires_at: Some(clock.now() + Duration::days(5)),
            },
        )?;
        offer::submit_for_approval(uow, offer.id, &[finance_id])?;
        Ok(offer)
    })?;
    approve_round(&store, &finance, ApprovalParent::Offer(offer.id))?;
    clock.advance(Duration::hours(3));
    store.transaction(&recruiter, |uow| {
        fire::<Offer>(uow, offer.id, "send_to_candidate")?;
        fire::<Offer>(uow, offer.id, "mark_accepted")
    })?;
    println!(
        "- Offer of {} -> {}",
        offer.salary,
        store.load::<Offer>(&recruiter, offer.id)?.status()
    );

    store.transaction(&recruiter, |uow| {
        let decision = hiring_decision::create(
            uow,
            NewHiringDecision {
                application_id: application.id,
                decision: Decision::Hire,
                rationale: "Strong systems design loop, offer accepted".to_string(),
                proposed_salary: Some(offer.salary),
            },
        )?;
        hiring_decision::approve(uow, decision.id(), None)
    })?;
    println!(
        "- Hiring decision approved -> application {}",
        store
            .load::<Application>(&recruiter, application.id)?
            .status()
    );

    clock.set(Utc.from_utc_datetime(&start_date.and_time(NaiveTime::MIN)) + Duration::hours(9));
    let verification = store.transaction(&recruiter, |uow| {
        let verification = i9::create(
            uow,
            NewI9Verification {
                application_id: application.id,
                employment_start_date: start_date,
            },
        )?;
        i9::complete_section1(
            uow,
            verification.id,
            Section1 {
                citizenship_status: Some(CitizenshipStatus::Citizen),
                attestation_accepted: true,
            },
        )?;
        fire::<I9Verification>(uow, verification.id, "begin_section2")?;
        Ok(verification)
    })?;
    println!(
        "- I-9 Section 2 due by {}",
        verification.section2_deadline.format("%Y-%m-%d %H:%M UTC")
    );

    clock.advance(Duration::days(1));
    store.transaction(&recruiter, |uow| {
        i9::complete_section2(uow, verification.id, vec!["US Passport".to_string()])
    })?;

    let provider = ScriptedProvider::new();
    let case = store.transaction(&recruiter, |uow| {
        let case = everify::create(uow, verification.id)?;
        everify::submit_case(uow, case.id, &provider)?;
        uow.load::<EVerifyCase>(case.id)
    })?;
    let external_id = case
        .external_case_id
        .clone()
        .ok_or_else(|| AppError::BadRequest("E-Verify case was not submitted".to_string()))?;

    if args.tnc {
        provider.set_status(
            &external_id,
            ProviderStatus::TentativeNonConfirmation {
                reason: Some("SSA name mismatch".to_string()),
            },
        );
        let status =
            store.transaction(&recruiter, |uow| everify::poll_case(uow, case.id, &provider))?;
        let tnc = store.load::<EVerifyCase>(&recruiter, case.id)?;
        println!(
            "- E-Verify {} -> {} (employee response due {})",
            external_id,
            status,
            tnc.tnc_response_deadline
                .map(|deadline| deadline.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
        clock.advance(Duration::days(4));
    }

    provider.set_status(&external_id, ProviderStatus::Authorized);
    let status =
        store.transaction(&recruiter, |uow| everify::poll_case(uow, case.id, &provider))?;
    let verified = store.load::<I9Verification>(&recruiter, verification.id)?;
    println!(
        "- E-Verify {} -> {} | I-9 {}{}",
        external_id,
        status,
        verified.status(),
        if verified.section2_late { " (Section 2 late)" } else { "" }
    );

    let transitions = store.query_audit(&AuditQuery {
        action: Some("stage_transition.created".to_string()),
        ..AuditQuery::for_organization(organization_id)
    })?;
    println!(
        "\nAudit: {} entries, {} stage transitions",
        audit.len(),
        transitions.len()
    );
    if args.show_audit {
        for entry in audit.entries() {
            println!(
                "  {} {:<40} {} [{}]",
                entry.created_at().format("%Y-%m-%d %H:%M"),
                entry.action(),
                entry.subject().id,
                entry.request_id()
            );
        }
    }

    println!("Published events:");
    for event_type in dispatch.event_types() {
        println!("  - {event_type}");
    }
    println!("Notifications:");
    for template in dispatch.templates() {
        println!("  - {template}");
    }

    Ok(())
}

/// Approve every pending approval of the parent's current round as `approver`.
fn approve_round(
    store: &WorkflowStore,
    approver: &TenantContext,
    parent: ApprovalParent,
) -> Result<(), AppError> {
    let pending = store.read(approver, |uow| Ok(approval::for_round(uow, parent, 1)))?;
    for request in pending {
        store.transaction(approver, |uow| approval::approve(uow, request.id, None))?;
    }
    Ok(())
}
