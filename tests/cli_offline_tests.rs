//! Command layer driven end to end against the in-process service.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use academic_chain::actor::memory::{sample_paper, MemoryConnector, MemoryState};
use academic_chain::actor::Review;
use academic_chain::cli::{execute, parse_command, run_line, Output};
use academic_chain::config::{Config, Network};
use academic_chain::identity::{Identity, MemoryCredentialStore, Principal, StaticAuthProvider};
use academic_chain::{AppContext, AppError, AppResult};

fn offline() -> (AppContext, Arc<MemoryState>) {
    let state = MemoryState::new();
    let author = Principal::new("alice");
    for (id, title) in [("p1", "One"), ("p2", "Two"), ("p3", "Three")] {
        state.seed_paper(sample_paper(id, title, &author));
    }
    let identity = Identity { principal: Principal::new("reviewer"), delegation: "d".into(), expires_at: Utc::now() + Duration::hours(1) };
    let ctx = AppContext::new(
        Config::default(),
        Arc::new(MemoryConnector::new(state.clone())),
        Arc::new(StaticAuthProvider::approving(identity)),
        Arc::new(MemoryCredentialStore::new()),
    );
    (ctx, state)
}

async fn run(ctx: &AppContext, line: &str) -> AppResult<Output> {
    let cmd = parse_command(line)?.expect("non-empty command");
    execute(ctx, cmd).await
}

fn lines(out: Output) -> Vec<String> {
    match out {
        Output::Lines(l) => l,
        other => panic!("expected lines, got {:?}", other),
    }
}

fn rows(out: Output) -> Vec<Vec<String>> {
    match out {
        Output::Table(t) => t.rows,
        other => panic!("expected a table, got {:?}", other),
    }
}

#[tokio::test]
async fn default_config_targets_a_local_replica() -> Result<()> {
    let (ctx, state) = offline();
    assert_eq!(ctx.config().network, Network::Local);
    ctx.init().await;
    assert_eq!(state.calls("fetch_root_key"), 1);
    assert!(ctx.session().factory().trust().key().is_some());
    Ok(())
}

#[tokio::test]
async fn browse_works_before_login_but_papers_does_not() -> Result<()> {
    let (ctx, state) = offline();
    ctx.init().await;

    assert_eq!(rows(run(&ctx, "browse").await?).len(), 3);
    let gated = lines(run(&ctx, "papers").await?);
    assert!(gated[0].contains("sign in"));
    assert_eq!(state.calls("get_all_papers"), 1);

    let err = run(&ctx, "profile").await.unwrap_err();
    assert_eq!(err.code_str(), "not_signed_in");
    Ok(())
}

#[tokio::test]
async fn login_profile_and_review_flow() -> Result<()> {
    let (ctx, state) = offline();
    ctx.init().await;

    let out = lines(run(&ctx, "login").await?);
    assert_eq!(out[0], "signed in as reviewer");
    assert!(out.iter().any(|l| l.contains("profile set")));

    run(&ctx, "profile set Ada Lovelace").await?;
    assert_eq!(state.profile(&Principal::new("reviewer")).map(|p| p.name), Some("Ada Lovelace".to_string()));
    assert!(!ctx.needs_profile_setup().await);

    let out = lines(run(&ctx, "review p1 4 clear and well argued").await?);
    assert_eq!(out, vec!["review submitted for p1".to_string()]);
    let reviews = rows(run(&ctx, "reviews p1").await?);
    assert_eq!(reviews.len(), 1);

    let papers = rows(run(&ctx, "papers").await?);
    let p1 = papers.iter().find(|r| r[0] == "p1").expect("p1 listed");
    assert_eq!(p1[4], "1");
    Ok(())
}

#[tokio::test]
async fn citing_unreviewed_paper_is_a_citation_error() -> Result<()> {
    let (ctx, state) = offline();
    ctx.init().await;
    run(&ctx, "login").await?;

    let err = run(&ctx, "submit-paper \"Follow up\" \"Extends One\" --link https://example.org/f --cite p1").await.unwrap_err();
    assert!(matches!(err, AppError::Rejected { .. }));
    assert!(err.is_citation_error());
    assert_eq!(state.papers().len(), 3);

    run(&ctx, "review p1 5 convincing").await?;
    let out = lines(run(&ctx, "submit-paper \"Follow up\" \"Extends One\" --link https://example.org/f --cite p1").await?);
    assert!(out[0].starts_with("paper submitted"));
    assert_eq!(rows(run(&ctx, "papers").await?).len(), 4);
    Ok(())
}

#[tokio::test]
async fn submit_paper_with_local_file() -> Result<()> {
    let (ctx, state) = offline();
    ctx.init().await;
    run(&ctx, "login").await?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("draft.pdf");
    std::fs::write(&path, b"%PDF-1.4 draft")?;
    run(&ctx, &format!("submit-paper \"Draft\" \"A draft\" --file {}", path.display())).await?;

    let papers = state.papers();
    let draft = papers.iter().find(|p| p.title == "Draft").expect("submitted");
    let blob = draft.file_reference.as_ref().expect("blob");
    assert_eq!(blob.filename, "draft.pdf");
    assert_eq!(blob.mime_type, "application/pdf");
    assert_eq!(blob.size, 14);
    assert_eq!(draft.author, Principal::new("reviewer"));
    Ok(())
}

#[tokio::test]
async fn dashboard_requires_login_then_lists_own_papers() -> Result<()> {
    let (ctx, _) = offline();
    ctx.init().await;
    assert_eq!(run(&ctx, "dashboard").await.unwrap_err().code_str(), "not_signed_in");

    run(&ctx, "login").await?;
    run(&ctx, "submit-paper \"Mine\" \"My paper\" --link https://example.org/m").await?;
    let out = lines(run(&ctx, "dashboard").await?);
    assert!(out.iter().any(|l| l.starts_with("papers:") && l.ends_with(" 1")));
    assert!(out.iter().any(|l| l.contains("reviewer")));

    run(&ctx, "logout").await?;
    let status = lines(run(&ctx, "status").await?);
    assert!(status[0].contains("signed out"));
    Ok(())
}

#[tokio::test]
async fn admin_bootstrap_makes_first_caller_admin() -> Result<()> {
    let (ctx, _) = offline();
    ctx.init().await;
    assert_eq!(run(&ctx, "admin").await.unwrap_err().code_str(), "actor_unavailable");

    run(&ctx, "login").await?;
    run(&ctx, "admin init").await?;
    assert_eq!(lines(run(&ctx, "admin").await?), vec!["you are an admin".to_string()]);
    assert_eq!(lines(run(&ctx, "role").await?), vec!["admin".to_string()]);
    Ok(())
}

#[tokio::test]
async fn earlier_review_allows_citation() -> Result<()> {
    let (ctx, state) = offline();
    state.seed_review(Review {
        id: "r-old".into(),
        paper_id: "p2".into(),
        reviewer: Principal::new("reviewer"),
        rating: 3,
        feedback: "read it last week".into(),
        submission_date: 0,
    });
    ctx.init().await;
    run(&ctx, "login").await?;

    run(&ctx, "submit-paper \"Sequel\" \"Builds on Two\" --link https://example.org/s --cite p2").await?;
    let sequel = state.papers().into_iter().find(|p| p.title == "Sequel").expect("submitted");
    assert_eq!(sequel.citations, vec!["p2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn one_shot_failure_is_returned_and_context_still_shuts_down() -> Result<()> {
    let (ctx, _) = offline();
    ctx.init().await;
    run(&ctx, "login").await?;
    run(&ctx, "papers").await?;
    assert!(!ctx.queries().is_empty());

    let err = run_line(&ctx, "paper nope").await.unwrap_err();
    assert_eq!(err.code_str(), "paper_not_found");
    assert!(run_line(&ctx, "frobnicate").await.is_err());
    assert!(matches!(run_line(&ctx, "   ").await?, Output::Lines(l) if l[0].starts_with("Commands")));

    ctx.shutdown();
    assert!(ctx.queries().is_empty());
    Ok(())
}
