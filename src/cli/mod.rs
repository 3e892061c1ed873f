//! Interactive command layer: parse a line, run it against an [`AppContext`],
//! and hand back something printable.

pub mod outputformatter;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::actor::{new_record_id, ExternalBlob, SubmitPaperArgs, SubmitReviewArgs, UserProfile, UserRole};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::identity::{Principal, SessionState};
use outputformatter::{dashboard_lines, paper_lines, papers_table, print_table, profile_lines, reviews_table, Table};

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitPaperInput {
    pub title: String,
    pub abstract_text: String,
    pub citations: Vec<String>,
    pub link: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Check,
    Init,
    Assign { user: Principal, role: UserRole },
    Profile(Principal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login,
    Logout,
    Status,
    Whoami,
    Papers,
    Browse,
    Paper(String),
    Reviews(String),
    Profile,
    ProfileSet(String),
    Balance,
    Dashboard,
    SubmitPaper(SubmitPaperInput),
    Review { paper_id: String, rating: u64, feedback: String },
    Role,
    Admin(AdminCommand),
    Help,
    Quit,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Lines(Vec<String>),
    Table(Table),
    Quit,
}

impl Output {
    fn line<S: Into<String>>(s: S) -> Self { Output::Lines(vec![s.into()]) }
}

pub const HELP: &str = "Commands:
  login                          sign in through the identity provider
  logout                         sign out and forget the stored credential
  status | whoami                show the session
  browse                         list all papers without signing in
  papers                         list all papers (signed in)
  paper <id>                     show one paper
  reviews <paper-id>             list the reviews of a paper
  profile                        show your profile
  profile set <name>             create or rename your profile
  balance                        show your token balance
  dashboard                      your papers and how they were received
  submit-paper \"<title>\" \"<abstract>\" (--file <path> | --link <url>) [--cite <id,id,...>]
  review <paper-id> <rating 1-5> <feedback...>
  role                           show your role
  admin | admin init | admin assign <principal> <admin|user|guest> | admin profile <principal>
  help                           show this help
  quit | exit                    leave";

/// Split on whitespace, keeping double-quoted runs together.
pub fn split_args(line: &str) -> AppResult<Vec<String>> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    out.push(std::mem::take(&mut cur));
                    has_token = false;
                }
            }
            c => {
                cur.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(AppError::user("unterminated_quote", "unterminated quote in command"));
    }
    if has_token {
        out.push(cur);
    }
    Ok(out)
}

fn need<'a>(args: &'a [String], i: usize, usage: &str) -> AppResult<&'a str> {
    args.get(i)
        .map(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::user("usage".to_string(), format!("usage: {}", usage)))
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> AppResult<Option<Command>> {
    let args = split_args(line.trim())?;
    let Some(head) = args.first() else { return Ok(None) };
    let cmd = match head.to_ascii_lowercase().as_str() {
        "login" => Command::Login,
        "logout" => Command::Logout,
        "status" => Command::Status,
        "whoami" => Command::Whoami,
        "papers" => Command::Papers,
        "browse" => Command::Browse,
        "paper" => Command::Paper(need(&args, 1, "paper <id>")?.to_string()),
        "reviews" => Command::Reviews(need(&args, 1, "reviews <paper-id>")?.to_string()),
        "profile" => match args.get(1).map(|s| s.to_ascii_lowercase()) {
            None => Command::Profile,
            Some(sub) if sub == "set" => {
                need(&args, 2, "profile set <name>")?;
                Command::ProfileSet(args[2..].join(" "))
            }
            Some(other) => return Err(AppError::user("unknown_command".to_string(), format!("unknown profile command '{}'", other))),
        },
        "balance" => Command::Balance,
        "dashboard" => Command::Dashboard,
        "submit-paper" => Command::SubmitPaper(parse_submit_paper(&args[1..])?),
        "review" => {
            let usage = "review <paper-id> <rating 1-5> <feedback...>";
            let paper_id = need(&args, 1, usage)?.to_string();
            let rating = need(&args, 2, usage)?
                .parse::<u64>()
                .ok()
                .filter(|r| (1..=5).contains(r))
                .ok_or_else(|| AppError::user("invalid_rating", "rating must be a whole number from 1 to 5"))?;
            need(&args, 3, usage)?;
            Command::Review { paper_id, rating, feedback: args[3..].join(" ") }
        }
        "role" => Command::Role,
        "admin" => Command::Admin(parse_admin(&args[1..])?),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(AppError::user("unknown_command".to_string(), format!("unknown command '{}', try 'help'", other))),
    };
    Ok(Some(cmd))
}

fn parse_submit_paper(args: &[String]) -> AppResult<SubmitPaperInput> {
    let usage = "submit-paper \"<title>\" \"<abstract>\" (--file <path> | --link <url>) [--cite <id,id,...>]";
    let mut positional = Vec::new();
    let mut input = SubmitPaperInput { title: String::new(), abstract_text: String::new(), citations: Vec::new(), link: None, file: None };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--link" => {
                input.link = Some(need(args, i + 1, usage)?.trim().to_string());
                i += 2;
            }
            "--file" => {
                input.file = Some(PathBuf::from(need(args, i + 1, usage)?));
                i += 2;
            }
            "--cite" => {
                input.citations = need(args, i + 1, usage)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                i += 2;
            }
            other => {
                positional.push(other.trim().to_string());
                i += 1;
            }
        }
    }
    if positional.len() != 2 || positional.iter().any(|p| p.is_empty()) {
        return Err(AppError::user("usage".to_string(), format!("title and abstract are required\nusage: {}", usage)));
    }
    match (&input.file, &input.link) {
        (None, None) => return Err(AppError::user("missing_source", "provide either --file or --link")),
        (Some(_), Some(_)) => return Err(AppError::user("conflicting_source", "use either --file or --link, not both")),
        _ => {}
    }
    input.abstract_text = positional.pop().unwrap_or_default();
    input.title = positional.pop().unwrap_or_default();
    Ok(input)
}

fn parse_admin(args: &[String]) -> AppResult<AdminCommand> {
    match args.first().map(|s| s.to_ascii_lowercase()).as_deref() {
        None => Ok(AdminCommand::Check),
        Some("init") => Ok(AdminCommand::Init),
        Some("assign") => {
            let usage = "admin assign <principal> <admin|user|guest>";
            let user = Principal::new(need(args, 1, usage)?);
            let role_text = need(args, 2, usage)?;
            let role = UserRole::parse(role_text)
                .ok_or_else(|| AppError::user("invalid_role".to_string(), format!("unknown role '{}'", role_text)))?;
            Ok(AdminCommand::Assign { user, role })
        }
        Some("profile") => Ok(AdminCommand::Profile(Principal::new(need(args, 1, "admin profile <principal>")?))),
        Some(other) => Err(AppError::user("unknown_command".to_string(), format!("unknown admin command '{}'", other))),
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        Some("tex") => "application/x-tex",
        _ => "application/octet-stream",
    }
}

/// Describe a local file as a blob reference for a submission.
pub async fn blob_for_file(path: &Path) -> AppResult<ExternalBlob> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::user("file_unreadable".to_string(), format!("cannot read {}: {}", path.display(), e)))?;
    if !meta.is_file() {
        return Err(AppError::user("file_unreadable".to_string(), format!("{} is not a file", path.display())));
    }
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("paper").to_string();
    Ok(ExternalBlob { id: new_record_id("blob"), filename, mime_type: mime_for(path).to_string(), size: meta.len() })
}

fn require_signed_in(ctx: &AppContext) -> AppResult<()> {
    if ctx.session().is_authenticated() {
        Ok(())
    } else {
        Err(AppError::auth("not_signed_in", "sign in first with 'login'"))
    }
}

pub async fn execute(ctx: &AppContext, cmd: Command) -> AppResult<Output> {
    debug!(target: "academic_chain::cli", "cli.execute {:?}", cmd);
    let queries = ctx.queries();
    match cmd {
        Command::Login => {
            if ctx.login().await {
                let mut lines = vec![format!("signed in as {}", ctx.session().principal().map(|p| p.to_string()).unwrap_or_default())];
                if ctx.needs_profile_setup().await {
                    lines.push("no profile yet; create one with 'profile set <name>'".to_string());
                }
                Ok(Output::Lines(lines))
            } else {
                Ok(Output::line("login did not complete"))
            }
        }
        Command::Logout => {
            ctx.logout().await;
            Ok(Output::line("signed out"))
        }
        Command::Status | Command::Whoami => {
            let snap = ctx.session().snapshot();
            let who = snap.principal.map(|p| p.to_string()).unwrap_or_else(|| "anonymous".to_string());
            let state = match snap.state {
                SessionState::Uninitialized => "starting",
                SessionState::Anonymous => "signed out",
                SessionState::Authenticating => "signing in",
                SessionState::Authenticated => "signed in",
            };
            Ok(Output::Lines(vec![
                format!("{} ({})", who, state),
                format!("network: {:?}  host: {}  canister: {}", ctx.config().network, ctx.config().host, ctx.config().canister_id),
            ]))
        }
        Command::Browse => Ok(Output::Table(papers_table(&ctx.browse_papers().await?))),
        Command::Papers => {
            let r = queries.all_papers().await;
            if r.is_not_ready() {
                return Ok(Output::line("sign in to load papers, or use 'browse' for the public list"));
            }
            Ok(Output::Table(papers_table(&r.into_result()?.unwrap_or_default())))
        }
        Command::Paper(id) => {
            require_signed_in(ctx)?;
            match queries.paper(Some(&id)).await.into_result()?.flatten() {
                Some(p) => Ok(Output::Lines(paper_lines(&p))),
                None => Err(AppError::not_found("paper_not_found".to_string(), format!("paper {} not found", id))),
            }
        }
        Command::Reviews(id) => {
            require_signed_in(ctx)?;
            let reviews = queries.reviews_for_paper(Some(&id)).await.into_result()?.unwrap_or_default();
            Ok(Output::Table(reviews_table(&reviews)))
        }
        Command::Profile => {
            require_signed_in(ctx)?;
            match queries.caller_profile().await.into_result()?.flatten() {
                Some(p) => Ok(Output::Lines(profile_lines(&p))),
                None => Ok(Output::line("no profile yet; create one with 'profile set <name>'")),
            }
        }
        Command::ProfileSet(name) => {
            require_signed_in(ctx)?;
            let existing = queries.caller_profile().await.value.flatten();
            let profile = match existing {
                Some(p) => UserProfile { name: name.trim().to_string(), ..p },
                None => UserProfile::named(name.trim()),
            };
            ctx.save_profile.invoke(&profile).await?;
            Ok(Output::line(format!("profile saved: {}", profile.name)))
        }
        Command::Balance => {
            require_signed_in(ctx)?;
            let balance = queries.token_balance().await.into_result()?.unwrap_or_default();
            Ok(Output::line(format!("{} tokens", balance)))
        }
        Command::Dashboard => match ctx.dashboard().await? {
            Some(d) => Ok(Output::Lines(dashboard_lines(&d))),
            None => Err(AppError::auth("not_signed_in", "sign in first with 'login'")),
        },
        Command::SubmitPaper(input) => {
            require_signed_in(ctx)?;
            let file_reference = match &input.file {
                Some(path) => Some(blob_for_file(path).await?),
                None => None,
            };
            let args = SubmitPaperArgs {
                id: new_record_id("paper"),
                title: input.title,
                abstract_text: input.abstract_text,
                file_reference,
                external_link: input.link,
                citations: input.citations,
            };
            ctx.submit_paper.invoke(&args).await?;
            Ok(Output::line(format!("paper submitted: {}", args.id)))
        }
        Command::Review { paper_id, rating, feedback } => {
            require_signed_in(ctx)?;
            let args = SubmitReviewArgs { id: new_record_id("review"), paper_id, rating, feedback };
            ctx.submit_review.invoke(&args).await?;
            Ok(Output::line(format!("review submitted for {}", args.paper_id)))
        }
        Command::Role => Ok(Output::line(ctx.caller_role().await?.as_str())),
        Command::Admin(AdminCommand::Check) => {
            let admin = ctx.is_admin().await?;
            Ok(Output::line(if admin { "you are an admin" } else { "you are not an admin" }))
        }
        Command::Admin(AdminCommand::Init) => {
            ctx.initialize_access_control().await?;
            Ok(Output::line("access control initialized"))
        }
        Command::Admin(AdminCommand::Assign { user, role }) => {
            ctx.assign_role(&user, role).await?;
            Ok(Output::line(format!("{} is now {}", user, role.as_str())))
        }
        Command::Admin(AdminCommand::Profile(user)) => match ctx.user_profile(&user).await? {
            Some(p) => Ok(Output::Lines(profile_lines(&p))),
            None => Ok(Output::line(format!("{} has no profile", user))),
        },
        Command::Help => Ok(Output::Lines(HELP.lines().map(|l| l.to_string()).collect())),
        Command::Quit => Ok(Output::Quit),
    }
}

/// Parse and run one line. A blank line yields the help text.
pub async fn run_line(ctx: &AppContext, line: &str) -> AppResult<Output> {
    match parse_command(line)? {
        Some(cmd) => execute(ctx, cmd).await,
        None => Ok(Output::Lines(HELP.lines().map(|l| l.to_string()).collect())),
    }
}

pub fn print_output(out: &Output) {
    match out {
        Output::Lines(lines) => {
            for l in lines {
                println!("{}", l);
            }
        }
        Output::Table(t) => print_table(t),
        Output::Quit => {}
    }
}

pub fn print_error(err: &AppError) {
    if err.is_citation_error() {
        eprintln!("Citation error: {}", err.message());
    } else {
        eprintln!("Error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_arguments_stay_together() {
        let a = split_args(r#"submit-paper "Graph Theory" "On graphs and more" --link https://x.org"#).unwrap();
        assert_eq!(a, vec!["submit-paper", "Graph Theory", "On graphs and more", "--link", "https://x.org"]);
        assert!(split_args(r#"paper "p1"#).is_err());
        assert_eq!(split_args(r#"profile set """#).unwrap(), vec!["profile", "set", ""]);
    }

    #[test]
    fn parses_basic_commands() {
        assert_eq!(parse_command("  ").unwrap(), None);
        assert_eq!(parse_command("LOGIN").unwrap(), Some(Command::Login));
        assert_eq!(parse_command("paper p1").unwrap(), Some(Command::Paper("p1".into())));
        assert_eq!(parse_command("profile set Ada Lovelace").unwrap(), Some(Command::ProfileSet("Ada Lovelace".into())));
        assert_eq!(parse_command("exit").unwrap(), Some(Command::Quit));
        assert!(parse_command("paper").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn review_rating_is_validated() {
        assert_eq!(
            parse_command("review p1 4 solid work").unwrap(),
            Some(Command::Review { paper_id: "p1".into(), rating: 4, feedback: "solid work".into() })
        );
        assert_eq!(parse_command("review p1 6 too good").unwrap_err().code_str(), "invalid_rating");
        assert!(parse_command("review p1 3").is_err());
    }

    #[test]
    fn submit_paper_needs_exactly_one_source() {
        let cmd = parse_command(r#"submit-paper "T" "A" --link https://arxiv.org/abs/1 --cite p1,p2"#).unwrap();
        match cmd {
            Some(Command::SubmitPaper(i)) => {
                assert_eq!(i.title, "T");
                assert_eq!(i.abstract_text, "A");
                assert_eq!(i.citations, vec!["p1", "p2"]);
                assert_eq!(i.link.as_deref(), Some("https://arxiv.org/abs/1"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_command(r#"submit-paper "T" "A""#).unwrap_err().code_str(), "missing_source");
        assert_eq!(
            parse_command(r#"submit-paper "T" "A" --file a.pdf --link x"#).unwrap_err().code_str(),
            "conflicting_source"
        );
        assert!(parse_command(r#"submit-paper "T" --link x"#).is_err());
    }

    #[test]
    fn admin_subcommands() {
        assert_eq!(parse_command("admin").unwrap(), Some(Command::Admin(AdminCommand::Check)));
        assert_eq!(
            parse_command("admin assign bob-principal user").unwrap(),
            Some(Command::Admin(AdminCommand::Assign { user: Principal::new("bob-principal"), role: UserRole::User }))
        );
        assert_eq!(parse_command("admin assign bob root").unwrap_err().code_str(), "invalid_role");
    }

    #[tokio::test]
    async fn file_blob_describes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.7 test").unwrap();
        let blob = blob_for_file(&path).await.unwrap();
        assert_eq!(blob.filename, "paper.pdf");
        assert_eq!(blob.mime_type, "application/pdf");
        assert_eq!(blob.size, 13);
        assert!(blob.id.starts_with("blob-"));
        assert!(blob_for_file(&dir.path().join("missing.pdf")).await.is_err());
    }
}
